mod common;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use steamqueue::manifest::{AcfManifestReader, KeyValue, Manifest, ManifestError, ManifestReader};
use steamqueue::resolver::{DependencyResolver, REDISTRIBUTABLES_APP_ID};

const FULL_MANIFEST: &str = r#"
"AppState"
{
	"appid"		"740"
	"Universe"		"1"
	"name"		"Counter-Strike Global Offensive - Dedicated Server"
	"StateFlags"		"4"
	"installdir"		"Counter-Strike Global Offensive Beta - Dedicated Server"
	"SizeOnDisk"		"35128371042"
	"buildid"		"12345678"
	"InstalledDepots"
	{
		"741"
		{
			"manifest"		"5419216939386335117"
			"size"		"30201834563"
		}
	}
	"SharedDepots"
	{
		"228988"		"228980"
		"1007"		"1007"
	}
	"DependentApps"
	{
		"0"		"2347770"
	}
}
"#;

fn resolver() -> DependencyResolver {
    DependencyResolver::new(Arc::new(AcfManifestReader))
}

// ── Parsing ─────────────────────────────────────────────────────

#[test]
fn parses_top_level_fields() {
    let m = Manifest::parse(FULL_MANIFEST).unwrap();

    assert_eq!(m.app_id(), Some("740"));
    assert_eq!(m.name(), Some("Counter-Strike Global Offensive - Dedicated Server"));
    assert_eq!(m.size_on_disk(), Some(35_128_371_042));
    assert_eq!(m.build_id(), Some(12_345_678));
    assert_eq!(m.state_flags(), Some(4));
}

#[test]
fn lookups_ignore_case() {
    let m = Manifest::parse(FULL_MANIFEST).unwrap();

    assert_eq!(m.get("APPID"), Some("740"));
    assert_eq!(m.get("sizeondisk"), Some("35128371042"));
    assert!(m.section("shareddepots").is_some());
}

#[test]
fn nested_sections_are_preserved() {
    let m = Manifest::parse(FULL_MANIFEST).unwrap();

    let installed = m.section("InstalledDepots").unwrap();
    assert_eq!(installed.len(), 1);
    let (depot, details) = &installed[0];
    assert_eq!(depot, "741");
    let details = details.as_section().unwrap();
    assert_eq!(
        details[0],
        ("manifest".to_string(), KeyValue::Str("5419216939386335117".to_string()))
    );

    // A section is not a string and vice versa.
    assert_eq!(m.get("InstalledDepots"), None);
    assert_eq!(m.section("appid"), None);
}

#[test]
fn comments_escapes_and_bare_words() {
    let text = r#"
// written by hand
"AppState"
{
    appid 10   // trailing comment
    "name" "Say \"hi\"\tnow"
    "path" "C:\\games"
}
"#;
    let m = Manifest::parse(text).unwrap();

    assert_eq!(m.app_id(), Some("10"));
    assert_eq!(m.name(), Some("Say \"hi\"\tnow"));
    assert_eq!(m.get("path"), Some("C:\\games"));
}

#[test]
fn empty_name_counts_as_missing() {
    let m = Manifest::parse(r#""AppState" { "appid" "10" "name" "" }"#).unwrap();
    assert_eq!(m.name(), None);
}

#[test]
fn malformed_input_is_rejected() {
    assert_eq!(
        Manifest::parse(r#""AppState" { "appid" "10""#).unwrap_err(),
        ManifestError::Unclosed
    );
    assert_eq!(
        Manifest::parse(r#""AppState" { "appid" }"#).unwrap_err(),
        ManifestError::MissingValue("appid".to_string())
    );
    assert!(matches!(
        Manifest::parse(r#""AppState" { } }"#).unwrap_err(),
        ManifestError::Unexpected(t, _) if t == "}"
    ));
    assert!(matches!(
        Manifest::parse("{ }").unwrap_err(),
        ManifestError::Unexpected(t, 0) if t == "{"
    ));
}

#[test]
fn non_numeric_fields_parse_to_none() {
    let m = Manifest::parse(r#""AppState" { "SizeOnDisk" "lots" }"#).unwrap();
    assert_eq!(m.size_on_disk(), None);
    assert_eq!(m.build_id(), None);
}

// ── Reader ──────────────────────────────────────────────────────

#[tokio::test]
async fn reader_loads_manifest_from_steamapps() {
    let dir = tempfile::tempdir().unwrap();
    common::write_manifest(dir.path(), "740", FULL_MANIFEST);

    let m = AcfManifestReader
        .read_manifest(&dir.path().join("steamapps"), "740")
        .await
        .unwrap();
    assert_eq!(m.app_id(), Some("740"));
    assert_eq!(
        AcfManifestReader::manifest_path(Path::new("/srv/steamapps"), "740"),
        Path::new("/srv/steamapps/appmanifest_740.acf")
    );
}

#[tokio::test]
async fn reader_refuses_path_like_app_ids() {
    let dir = tempfile::tempdir().unwrap();
    common::write_manifest(dir.path(), "740", FULL_MANIFEST);
    let steamapps = dir.path().join("steamapps");

    for bad in ["", "../740", "740 ", "abc"] {
        assert!(AcfManifestReader.read_manifest(&steamapps, bad).await.is_none(), "{bad:?}");
    }
}

// ── Resolver ────────────────────────────────────────────────────

#[tokio::test]
async fn resolves_shared_and_dependent_apps() {
    let dir = tempfile::tempdir().unwrap();
    common::write_manifest(dir.path(), "740", FULL_MANIFEST);

    let deps = resolver().resolve_dependencies(dir.path(), "740").await;

    let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
    assert_eq!(deps, ["1007", "2347770"]);
}

#[tokio::test]
async fn redistributables_and_self_are_excluded() {
    let dir = tempfile::tempdir().unwrap();
    common::write_manifest(
        dir.path(),
        "90",
        r#""AppState"
        {
            "appid" "90"
            "SharedDepots" { "228983" "228980" "91" "90" "92" "70" "93" "70" }
        }"#,
    );

    let deps = resolver().resolve_dependencies(dir.path(), "90").await;

    assert!(!deps.contains(REDISTRIBUTABLES_APP_ID));
    assert!(!deps.contains("90"));
    assert_eq!(deps.into_iter().collect::<Vec<_>>(), ["70"]);
}

#[tokio::test]
async fn dependent_apps_as_sections_use_keys() {
    let dir = tempfile::tempdir().unwrap();
    common::write_manifest(
        dir.path(),
        "90",
        r#""AppState"
        {
            "DependentApps"
            {
                "1500" { "installed" "1" }
                "0"    "not-a-number"
            }
        }"#,
    );

    let deps = resolver().resolve_dependencies(dir.path(), "90").await;
    assert_eq!(deps.into_iter().collect::<Vec<_>>(), ["1500"]);
}

#[tokio::test]
async fn missing_or_malformed_manifest_resolves_to_nothing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(resolver().resolve_dependencies(dir.path(), "740").await.is_empty());

    common::write_manifest(dir.path(), "740", r#""AppState" { "SharedDepots" { "1" "#);
    assert!(resolver().resolve_dependencies(dir.path(), "740").await.is_empty());
}

#[tokio::test]
async fn manifest_without_dependency_sections_resolves_to_nothing() {
    let dir = tempfile::tempdir().unwrap();
    common::write_manifest(dir.path(), "740", r#""AppState" { "appid" "740" }"#);

    assert!(resolver().resolve_dependencies(dir.path(), "740").await.is_empty());
}

struct FixedReader(Manifest);

#[async_trait]
impl ManifestReader for FixedReader {
    async fn read_manifest(&self, _steamapps_dir: &Path, _app_id: &str) -> Option<Manifest> {
        Some(self.0.clone())
    }
}

#[tokio::test]
async fn resolver_accepts_any_manifest_source() {
    let manifest = Manifest::parse(r#""AppState" { "SharedDepots" { "5" "6" } }"#).unwrap();
    let resolver = DependencyResolver::new(Arc::new(FixedReader(manifest)));

    let deps = resolver.resolve_dependencies(Path::new("/nowhere"), "1").await;
    assert_eq!(deps.into_iter().collect::<Vec<_>>(), ["6"]);
}
