//! Catalog loading, merging and serialization against the shared fixtures

mod common;

use common::{fixture, fixture_path, init_test_logging};
use pretty_assertions::assert_eq;
use strata_core::overlay::{CatalogSource, OverlayDatabase, Quality, Status};
use tempfile::TempDir;

#[test]
fn test_fixture_lists_in_precedence_order() {
    init_test_logging();
    let db = OverlayDatabase::from_file(&fixture_path("global-overlays.xml")).unwrap();

    let names: Vec<_> = db.list().iter().map(|d| d.name.clone()).collect();
    assert_eq!(names, vec!["wrobel", "wrobel-stable"]);

    let wrobel = db.select("wrobel").unwrap();
    assert_eq!(wrobel.priority, 10);
    assert_eq!(wrobel.quality, Quality::Experimental);
    assert_eq!(wrobel.status, Status::Official);
    assert_eq!(wrobel.descriptions, vec!["Test"]);
    assert_eq!(wrobel.owner.email, "nobody@gentoo.org");
    assert_eq!(wrobel.owner.name, None);
    assert_eq!(
        wrobel.source_uris().collect::<Vec<_>>(),
        vec!["https://overlays.gentoo.org/svn/dev/wrobel"]
    );
    assert_eq!(wrobel.source_types().collect::<Vec<_>>(), vec!["Subversion"]);
    assert!(wrobel.feeds.is_empty());
    assert_eq!(wrobel.homepage, None);
    assert_eq!(wrobel.irc, None);

    let stable = db.select("wrobel-stable").unwrap();
    assert_eq!(stable.priority, 50);
    assert_eq!(
        stable.descriptions,
        vec!["A collection of ebuilds from Gunnar Wrobel [wrobel@gentoo.org]."]
    );
}

#[test]
fn test_parse_serialize_parse_is_identity() {
    let original = OverlayDatabase::parse(&fixture("global-overlays.xml"), "fixture").unwrap();

    let written = original.to_document();
    let reparsed = OverlayDatabase::parse(&written, "written").unwrap();
    assert_eq!(reparsed, original);
    assert_eq!(reparsed.to_document(), written);
}

#[test]
fn test_write_is_byte_stable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.xml");
    let db = OverlayDatabase::from_file(&fixture_path("global-overlays.xml")).unwrap();

    db.write(&path).unwrap();
    let first = std::fs::read(&path).unwrap();
    db.write(&path).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), first);
}

#[test]
fn test_legacy_layout_loads_equal_database() {
    let current = OverlayDatabase::from_file(&fixture_path("global-overlays.xml")).unwrap();
    let legacy = OverlayDatabase::from_file(&fixture_path("global-overlays-legacy.xml")).unwrap();
    assert_eq!(legacy, current);
}

#[test]
fn test_overlapping_sources_later_wins() {
    let base = fixture("global-overlays.xml");
    let patched = base.replace("<description>Test</description>", "<description>Patched</description>");

    let report = OverlayDatabase::load(&[
        CatalogSource::text("base", base),
        CatalogSource::text("patched", patched),
    ])
    .unwrap();

    assert_eq!(report.database.len(), 2);
    assert_eq!(report.database.select("wrobel").unwrap().descriptions, vec!["Patched"]);
}

#[test]
fn test_disjoint_sources_sum() {
    let base = fixture("global-overlays.xml");
    let renamed = base
        .replace("<name>wrobel</name>", "<name>other</name>")
        .replace("<name>wrobel-stable</name>", "<name>other-stable</name>");

    let report = OverlayDatabase::load(&[
        CatalogSource::text("base", base.clone()),
        CatalogSource::text("renamed", renamed),
    ])
    .unwrap();

    let only_base = OverlayDatabase::parse(&base, "base").unwrap();
    assert_eq!(report.database.len(), 4);
    assert_eq!(
        report.database.get("wrobel"),
        only_base.get("wrobel")
    );
    assert!(report.warnings.is_empty());
}

#[test]
fn test_malformed_source_is_a_warning() {
    let report = OverlayDatabase::load(&[
        CatalogSource::text("base", fixture("global-overlays.xml")),
        CatalogSource::text("broken", "<repositories><repo><name>x</name></repo></repositories>"),
    ])
    .unwrap();

    assert_eq!(report.database.len(), 2);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].to_string().contains("broken"));
}
