//! Version-specific runtime API facades.
//!
//! SCO content discovers the API by walking up to a global named `API`
//! (SCORM 1.2) or `API_1484_11` (SCORM 2004) and calls it with strings only.
//! The embedding page owns that global; it obtains one of these facades and
//! forwards calls by name through [`RuntimeApi::invoke`].

use super::adapter::RuntimeAdapter;
use crate::version::ScormVersion;

fn flag(ok: bool) -> String {
    String::from(if ok { "true" } else { "false" })
}

/// SCORM 1.2 surface.
#[derive(Clone)]
pub struct Scorm12Api {
    adapter: RuntimeAdapter,
}

impl Scorm12Api {
    pub const GLOBAL_NAME: &'static str = "API";

    pub fn new(adapter: RuntimeAdapter) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &RuntimeAdapter {
        &self.adapter
    }

    pub fn lms_initialize(&self, arg: &str) -> String {
        flag(self.adapter.initialize(arg))
    }

    pub fn lms_get_value(&self, key: &str) -> String {
        self.adapter.get_value(key)
    }

    pub fn lms_set_value(&self, key: &str, value: &str) -> String {
        flag(self.adapter.set_value(key, value))
    }

    pub fn lms_commit(&self, arg: &str) -> String {
        flag(self.adapter.commit(arg))
    }

    pub fn lms_finish(&self, arg: &str) -> String {
        flag(self.adapter.terminate(arg))
    }

    pub fn lms_get_last_error(&self) -> String {
        self.adapter.get_last_error()
    }

    pub fn lms_get_error_string(&self, code: &str) -> String {
        self.adapter.get_error_string(code)
    }

    pub fn lms_get_diagnostic(&self, code: &str) -> String {
        self.adapter.get_diagnostic(code)
    }
}

/// SCORM 2004 surface.
#[derive(Clone)]
pub struct Scorm2004Api {
    adapter: RuntimeAdapter,
}

impl Scorm2004Api {
    pub const GLOBAL_NAME: &'static str = "API_1484_11";

    pub fn new(adapter: RuntimeAdapter) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &RuntimeAdapter {
        &self.adapter
    }

    pub fn initialize(&self, arg: &str) -> String {
        flag(self.adapter.initialize(arg))
    }

    pub fn get_value(&self, key: &str) -> String {
        self.adapter.get_value(key)
    }

    pub fn set_value(&self, key: &str, value: &str) -> String {
        flag(self.adapter.set_value(key, value))
    }

    pub fn commit(&self, arg: &str) -> String {
        flag(self.adapter.commit(arg))
    }

    pub fn terminate(&self, arg: &str) -> String {
        flag(self.adapter.terminate(arg))
    }

    pub fn get_last_error(&self) -> String {
        self.adapter.get_last_error()
    }

    pub fn get_error_string(&self, code: &str) -> String {
        self.adapter.get_error_string(code)
    }

    pub fn get_diagnostic(&self, code: &str) -> String {
        self.adapter.get_diagnostic(code)
    }
}

/// The facade matching an adapter's version.
#[derive(Clone)]
pub enum RuntimeApi {
    Scorm12(Scorm12Api),
    Scorm2004(Scorm2004Api),
}

impl RuntimeApi {
    pub fn for_adapter(adapter: RuntimeAdapter) -> Self {
        match adapter.version() {
            ScormVersion::Scorm12 => Self::Scorm12(Scorm12Api::new(adapter)),
            ScormVersion::Scorm2004 => Self::Scorm2004(Scorm2004Api::new(adapter)),
        }
    }

    pub fn global_name(&self) -> &'static str {
        match self {
            Self::Scorm12(_) => Scorm12Api::GLOBAL_NAME,
            Self::Scorm2004(_) => Scorm2004Api::GLOBAL_NAME,
        }
    }

    pub fn adapter(&self) -> &RuntimeAdapter {
        match self {
            Self::Scorm12(api) => api.adapter(),
            Self::Scorm2004(api) => api.adapter(),
        }
    }

    /// Dispatch a call by its exact runtime API name. Missing arguments are
    /// treated as empty strings. `None` for names this version does not
    /// define.
    pub fn invoke(&self, method: &str, args: &[&str]) -> Option<String> {
        let arg = |i: usize| args.get(i).copied().unwrap_or_default();
        let result = match self {
            Self::Scorm12(api) => match method {
                "LMSInitialize" => api.lms_initialize(arg(0)),
                "LMSGetValue" => api.lms_get_value(arg(0)),
                "LMSSetValue" => api.lms_set_value(arg(0), arg(1)),
                "LMSCommit" => api.lms_commit(arg(0)),
                "LMSFinish" => api.lms_finish(arg(0)),
                "LMSGetLastError" => api.lms_get_last_error(),
                "LMSGetErrorString" => api.lms_get_error_string(arg(0)),
                "LMSGetDiagnostic" => api.lms_get_diagnostic(arg(0)),
                _ => return None,
            },
            Self::Scorm2004(api) => match method {
                "Initialize" => api.initialize(arg(0)),
                "GetValue" => api.get_value(arg(0)),
                "SetValue" => api.set_value(arg(0), arg(1)),
                "Commit" => api.commit(arg(0)),
                "Terminate" => api.terminate(arg(0)),
                "GetLastError" => api.get_last_error(),
                "GetErrorString" => api.get_error_string(arg(0)),
                "GetDiagnostic" => api.get_diagnostic(arg(0)),
                _ => return None,
            },
        };
        Some(result)
    }
}
