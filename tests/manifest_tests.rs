//! Manifest parsing integration tests
//!
//! Real-world manifests mix prefixed and unprefixed sequencing elements;
//! both spellings must produce the same package descriptor.

use std::io::{Cursor, Write};

use scorm_runtime::{ManifestError, PackageError, PackageManifest, ScormVersion};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const NAMESPACED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest identifier="golf" version="1.3"
    xmlns="http://www.imsglobal.org/xsd/imscp_v1p1"
    xmlns:adlcp="http://www.adlnet.org/xsd/adlcp_v1p3"
    xmlns:imsss="http://www.imsglobal.org/xsd/imsss">
  <metadata>
    <schema>ADL SCORM</schema>
    <schemaversion>2004 3rd Edition</schemaversion>
  </metadata>
  <organizations default="golf-org">
    <organization identifier="golf-org">
      <title>Golf Explained</title>
      <item identifier="playing" identifierref="playing-res">
        <title>Playing the Game</title>
        <imsss:sequencing>
          <imsss:objectives>
            <imsss:primaryObjective objectiveID="playing-primary" satisfiedByMeasure="true">
              <imsss:minNormalizedMeasure>0.7</imsss:minNormalizedMeasure>
            </imsss:primaryObjective>
            <imsss:objective objectiveID="etiquette"/>
          </imsss:objectives>
        </imsss:sequencing>
      </item>
      <item identifier="scoring" identifierref="scoring-res">
        <title>Scoring</title>
        <imsss:sequencing>
          <imsss:objectives>
            <imsss:objective objectiveID="etiquette"/>
            <imsss:objective objectiveID="handicap" satisfiedByMeasure="false"/>
          </imsss:objectives>
        </imsss:sequencing>
      </item>
    </organization>
  </organizations>
  <resources>
    <resource identifier="playing-res" type="webcontent" adlcp:scormType="sco" href="shared/launch.html?content=playing">
      <file href="shared/launch.html"/>
    </resource>
    <resource identifier="scoring-res" type="webcontent" adlcp:scormType="sco" href="shared/launch.html?content=scoring"/>
  </resources>
</manifest>"#;

fn bare(xml: &str) -> String {
    xml.replace("imsss:", "")
}

#[test]
fn test_prefixed_and_bare_objectives_match() {
    let prefixed = PackageManifest::parse(NAMESPACED).unwrap();
    let plain = PackageManifest::parse(&bare(NAMESPACED)).unwrap();

    assert_eq!(prefixed.objectives, plain.objectives);
    let ids: Vec<&str> = prefixed.objectives.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["playing-primary", "etiquette", "handicap"]);

    let primary = &prefixed.objectives[0];
    assert!(primary.primary);
    assert!(primary.satisfied_by_measure);
    assert_eq!(primary.min_normalized_measure, 0.7);
    assert!(!prefixed.objectives[2].satisfied_by_measure);
}

#[test]
fn test_version_title_and_entry_point() {
    let manifest = PackageManifest::parse(NAMESPACED).unwrap();
    assert_eq!(manifest.version, ScormVersion::Scorm2004);
    assert_eq!(manifest.identifier.as_deref(), Some("golf"));
    assert_eq!(manifest.title, "Golf Explained");
    assert_eq!(manifest.entry_point, "shared/launch.html?content=playing");
    assert_eq!(manifest.default_organization.as_deref(), Some("golf-org"));
    assert_eq!(manifest.organizations[0].items.len(), 2);
    assert_eq!(manifest.scaled_passing_score(), Some(0.7));
}

#[test]
fn test_title_falls_back_to_lom_description() {
    let manifest = PackageManifest::parse(
        r#"<manifest>
  <metadata>
    <lom:lom>
      <lom:general>
        <lom:description><lom:string language="en">Described course</lom:string></lom:description>
      </lom:general>
    </lom:lom>
  </metadata>
  <organizations><organization identifier="o"/></organizations>
</manifest>"#,
    )
    .unwrap();
    assert_eq!(manifest.title, "Described course");
}

#[test]
fn test_defaults_without_organizations() {
    let manifest = PackageManifest::parse(r#"<manifest identifier="x"><resources/></manifest>"#).unwrap();
    assert_eq!(manifest.title, "Untitled Course");
    assert_eq!(manifest.entry_point, "index.html");
    assert_eq!(manifest.version, ScormVersion::Scorm12);
    assert_eq!(manifest.scaled_passing_score(), None);
}

#[test]
fn test_nested_item_mastery_score() {
    let manifest = PackageManifest::parse(
        r#"<manifest xmlns:adlcp="http://www.adlnet.org/xsd/adlcp_rootv1p2">
  <organizations>
    <organization identifier="o">
      <item identifier="module">
        <item identifier="lesson" identifierref="r">
          <adlcp:masteryscore>75</adlcp:masteryscore>
        </item>
      </item>
    </organization>
  </organizations>
  <resources><resource identifier="r" href="lesson.html"/></resources>
</manifest>"#,
    )
    .unwrap();
    assert_eq!(manifest.mastery_score, Some(75.0));
    assert_eq!(manifest.entry_point, "lesson.html");
}

#[test]
fn test_from_archive() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("IMSMANIFEST.XML", SimpleFileOptions::default()).unwrap();
    writer.write_all(NAMESPACED.as_bytes()).unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let manifest = PackageManifest::from_archive(&mut archive).unwrap();
    assert_eq!(manifest.title, "Golf Explained");
}

#[test]
fn test_from_archive_without_manifest() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("index.html", SimpleFileOptions::default()).unwrap();
    writer.write_all(b"<html></html>").unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let err = PackageManifest::from_archive(&mut archive).unwrap_err();
    assert!(matches!(err, PackageError::Manifest(ManifestError::NotFound)));
}
