//! Integration tests for configurator runs against real shell scripts.

#![cfg(unix)]

use configurator_core::{ConfiguratorKind, Document, Element, Settings};
use configurator_exec::{
    ConfiguratorPipeline, PipelineError, ReportContent, RunConfig, ERROR_CODE, ERROR_MESSAGE,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn write_script(dir: &Path, name: &str, body: &str, mode: u32) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).expect("chmod");
}

fn write_values(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("values.xml");
    std::fs::write(&path, content).expect("write values");
    path
}

fn error_of(entry: &Element) -> &Element {
    entry.children()[0]
        .child("errors")
        .and_then(|e| e.child("error_list"))
        .and_then(|e| e.child("error"))
        .expect("error subtree")
}

/// Test: one good, one failing and one non-executable script
#[tokio::test]
async fn test_mixed_outcomes() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    write_script(&scripts, "a", "echo '<ok/>'", 0o755);
    write_script(&scripts, "b", "echo boom >&2; exit 1", 0o755);
    write_script(&scripts, "c", "echo '<never/>'", 0o644);
    let values = write_values(root.path(), "<config/>");

    let report = ConfiguratorPipeline::run(&scripts, &values, &RunConfig::default())
        .await
        .expect("run failed");

    assert_eq!(report.len(), 2, "non-executable file must be skipped");
    assert_eq!(report.failed_count(), 1);
    assert_eq!(
        report.entries()[0].content,
        ReportContent::Verbatim("<ok/>".to_string())
    );

    let doc = Document::parse(report.to_xml_string().unwrap()).expect("report is well-formed");
    let children = doc.root().children();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].name(), "ok");
    assert_eq!(children[1].name(), "b");

    let error = error_of(&children[1]);
    assert_eq!(error.child("code").and_then(Element::text), Some("999"));
    assert_eq!(error.child("success").and_then(Element::text), Some("false"));
    assert_eq!(error.child("message").and_then(Element::text), Some(ERROR_MESSAGE));
    let detail = error.child("detail").and_then(Element::text).unwrap();
    assert!(detail.contains("boom"));
    assert!(detail.contains("ReturnCode = 1"));
    assert!(children[1].children()[0].child("extensions").is_some());
}

/// Test: values document bindings reach the scripts
#[tokio::test]
async fn test_values_become_environment() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    write_script(
        &scripts,
        "host",
        "echo \"<host>$CONFIG__SYSTEM__HOSTNAME</host>\"",
        0o755,
    );
    write_script(
        &scripts,
        "net",
        "printf '<net><![CDATA[%s]]></net>' \"$CONFIG__NET\"",
        0o755,
    );
    write_script(
        &scripts,
        "unset",
        "if [ -z \"${CONFIG__PROXY+x}\" ]; then echo '<unset/>'; else echo '<set/>'; fi",
        0o755,
    );
    let values = write_values(
        root.path(),
        r#"<config><system><hostname>box-1</hostname></system><proxy/><net list="true"><host>x</host></net></config>"#,
    );

    let report = ConfiguratorPipeline::run(&scripts, &values, &RunConfig::default())
        .await
        .expect("run failed");

    let xml = report.to_xml_string().unwrap();
    assert!(xml.contains("<host>box-1</host>"), "{xml}");
    assert!(xml.contains("<unset/>"), "{xml}");
    assert!(
        xml.contains(r#"<net><![CDATA[<net list="true"><host>x</host></net>]]></net>"#),
        "{xml}"
    );
}

/// Test: a hanging script is killed and the run still completes
#[tokio::test]
async fn test_timeout_produces_error_entry() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    write_script(&scripts, "a", "echo '<ok/>'", 0o755);
    write_script(&scripts, "hang", "exec sleep 60", 0o755);
    let values = write_values(root.path(), "<config/>");

    let config = RunConfig::default().with_timeout_secs(1);
    let start = Instant::now();
    let report = ConfiguratorPipeline::run(&scripts, &values, &config)
        .await
        .expect("run failed");

    assert!(start.elapsed() < Duration::from_secs(30));
    assert_eq!(report.len(), 2);
    assert!(!report.entries()[0].is_synthesized());
    match &report.entries()[1].content {
        ReportContent::Synthesized(element) => {
            let detail = error_of(element)
                .child("detail")
                .and_then(Element::text)
                .unwrap();
            assert!(detail.contains("timed out"));
            assert!(detail.contains("ReturnCode = 70"));
        }
        other => panic!("expected synthesized entry, got {other:?}"),
    }
}

/// Test: output that is not a document is replaced by an error entry
#[tokio::test]
async fn test_garbage_output_is_synthesized() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    write_script(&scripts, "empty", "true", 0o755);
    write_script(&scripts, "garbage", "echo 'hello <world'", 0o755);
    write_script(&scripts, "valid-but-failed", "echo '<ok/>'; exit 2", 0o755);
    let values = write_values(root.path(), "<config/>");

    let report = ConfiguratorPipeline::run(&scripts, &values, &RunConfig::default())
        .await
        .expect("run failed");

    assert_eq!(report.len(), 3);
    assert_eq!(report.failed_count(), 3);
    let doc = Document::parse(report.to_xml_string().unwrap()).expect("well-formed");
    for child in doc.root().children() {
        let code = error_of(child).child("code").and_then(Element::text);
        assert_eq!(code, Some(ERROR_CODE.to_string().as_str()));
    }
}

/// Test: oversized output is cut off with a note, unlimited output is kept
#[tokio::test]
async fn test_large_reports_and_output_limit() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    write_script(
        &scripts,
        "big",
        "printf '<big>'; head -c 11534336 /dev/zero | tr '\\0' x; printf '</big>'",
        0o755,
    );
    let values = write_values(root.path(), "<config/>");

    let config = RunConfig::default();
    let report = ConfiguratorPipeline::run(&scripts, &values, &config)
        .await
        .expect("run failed");
    match &report.entries()[0].content {
        ReportContent::Synthesized(element) => {
            let detail = error_of(element)
                .child("detail")
                .and_then(Element::text)
                .unwrap();
            assert!(detail.contains("stdout truncated after 10485760 bytes (11534347 bytes produced)"));
        }
        other => panic!("expected synthesized entry, got {other:?}"),
    }

    let config = RunConfig::default().with_max_output_bytes(0);
    let report = ConfiguratorPipeline::run(&scripts, &values, &config)
        .await
        .expect("run failed");
    match &report.entries()[0].content {
        ReportContent::Verbatim(markup) => {
            assert_eq!(markup.len(), 11534347);
            assert!(markup.starts_with("<big>xxx"));
            assert!(markup.ends_with("xxx</big>"));
        }
        other => panic!("expected verbatim entry, got {other:?}"),
    }
}

/// Test: order follows file names regardless of completion order
#[tokio::test]
async fn test_report_order_under_concurrency() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    for (name, delay) in [("01", "0.4"), ("02", "0"), ("03", "0.2"), ("04", "0.1"), ("05", "0")] {
        write_script(
            &scripts,
            name,
            &format!("sleep {delay}; echo '<s{name}/>'"),
            0o755,
        );
    }
    let values = write_values(root.path(), "<config/>");

    let config = RunConfig::default().with_max_concurrent(2);
    let report = ConfiguratorPipeline::run(&scripts, &values, &config)
        .await
        .expect("run failed");

    assert_eq!(
        report.to_xml_string().unwrap(),
        "<reports><s01/><s02/><s03/><s04/><s05/></reports>"
    );
}

/// Test: missing or malformed values document aborts before any script runs
#[tokio::test]
async fn test_values_failures_are_fatal() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    let marker = root.path().join("ran");
    write_script(
        &scripts,
        "a",
        &format!("touch {}; echo '<ok/>'", marker.display()),
        0o755,
    );

    let missing = root.path().join("missing.xml");
    let err = ConfiguratorPipeline::run(&scripts, &missing, &RunConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Values(_)));

    let malformed = write_values(root.path(), "<config><a></config>");
    let err = ConfiguratorPipeline::run(&scripts, &malformed, &RunConfig::default())
        .await
        .unwrap_err();
    match err {
        PipelineError::Values(e) => assert!(e.position().is_some()),
        other => panic!("expected values error, got {other:?}"),
    }

    assert!(!marker.exists(), "no script may run after a fatal error");
}

/// Test: missing script directory is fatal
#[tokio::test]
async fn test_missing_directory_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let values = write_values(root.path(), "<config/>");

    let err = ConfiguratorPipeline::run(&root.path().join("nope"), &values, &RunConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Catalog(_)));
}

/// Test: report written to a stream is a complete document
#[tokio::test]
async fn test_run_to_writer() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    write_script(&scripts, "a", "echo '<ok/>'", 0o755);
    let values = write_values(root.path(), "<config/>");

    let mut out = Vec::new();
    let config = RunConfig::default().with_report_tag("read_reports");
    let report = ConfiguratorPipeline::run_to_writer(&scripts, &values, &config, &mut out)
        .await
        .expect("run failed");
    assert_eq!(report.len(), 1);

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("<?xml"));
    assert!(text.ends_with("<read_reports><ok/></read_reports>"));
}

/// Test: several kinds are wrapped in one composite report
#[tokio::test]
async fn test_run_kinds() {
    let root = tempfile::tempdir().unwrap();
    let ext = root.path().join("ext");
    for kind in ConfiguratorKind::DEFAULT {
        std::fs::create_dir_all(ext.join(kind.directory_name())).unwrap();
    }
    write_script(&ext.join("read.d"), "r", "echo \"<r>$1</r>\"", 0o755);
    write_script(&ext.join("validate.d"), "v", "exit 3", 0o755);
    let values = write_values(root.path(), "<config/>");

    let settings = Settings {
        values_path: values,
        extension_root: ext.clone(),
        timeout_secs: 10,
        ..Settings::default()
    };

    let composite =
        ConfiguratorPipeline::run_kinds(&settings, &ConfiguratorKind::DEFAULT, Some("quick"))
            .await
            .expect("run failed");
    assert_eq!(composite.script_count(), 2);
    assert_eq!(composite.failed_count(), 1);

    let doc = Document::parse(composite.to_xml_string().unwrap()).unwrap();
    assert_eq!(doc.root().name(), "configurators");
    let tags: Vec<_> = doc.root().children().iter().map(Element::name).collect();
    assert_eq!(
        tags,
        vec!["read_reports", "validation_reports", "discovery_reports"]
    );
    assert_eq!(
        doc.root().children()[0].child("r").and_then(Element::text),
        Some("quick")
    );

    // A missing kind directory aborts the whole composite run.
    let err = ConfiguratorPipeline::run_kinds(&settings, &[ConfiguratorKind::Write], None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Catalog(_)));
}
