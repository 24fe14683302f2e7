mod common;

use std::cell::RefCell;
use std::path::Path;

use anyhow::Result;
use binfmt_support::format::{FormatRecord, FormatSpec};
use binfmt_support::resolve::{DetectorRunner, Resolver};
use common::{TestEnv, magic_record, with_detector};

fn extension_record(name: &str, extension: &str) -> FormatRecord {
    FormatSpec {
        extension: Some(extension.to_string()),
        interpreter: Some(format!("/usr/bin/{}", name)),
        ..Default::default()
    }
    .build(name)
    .unwrap()
}

fn names(records: &[FormatRecord]) -> Vec<&str> {
    records.iter().map(|record| record.name.as_str()).collect()
}

/// Accepts for the detectors listed, remembering every call.
struct ScriptedDetectors {
    accepting: Vec<&'static str>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedDetectors {
    fn new(accepting: Vec<&'static str>) -> Self {
        Self { accepting, calls: RefCell::new(Vec::new()) }
    }
}

impl DetectorRunner for ScriptedDetectors {
    fn accepts(&self, detector: &str, _target: &Path) -> bool {
        self.calls.borrow_mut().push(detector.to_string());
        self.accepting.iter().any(|accepted| *accepted == detector)
    }
}

#[test]
fn test_detectors_first_then_fallbacks() -> Result<()> {
    let env = TestEnv::new();
    let target = env.write_target("prog", b"#!/bin/sh\n");

    let resolver = Resolver::new(vec![
        with_detector(magic_record("a", None, "#!"), "/detect/a"),
        magic_record("b", None, "#!"),
        with_detector(magic_record("c", None, "#!"), "/detect/c"),
    ]);
    let detectors = ScriptedDetectors::new(vec!["/detect/c"]);

    let resolved = resolver.resolve(&target, &detectors)?;

    assert_eq!(names(&resolved), vec!["c", "b"]);
    assert_eq!(*detectors.calls.borrow(), vec!["/detect/a", "/detect/c"]);
    Ok(())
}

#[test]
fn test_detector_not_run_without_static_match() -> Result<()> {
    let env = TestEnv::new();
    let target = env.write_target("prog", b"\x7fELF");

    let resolver = Resolver::new(vec![with_detector(magic_record("a", None, "#!"), "/detect/a")]);
    let detectors = ScriptedDetectors::new(vec!["/detect/a"]);

    assert!(resolver.resolve(&target, &detectors)?.is_empty());
    assert!(detectors.calls.borrow().is_empty());
    Ok(())
}

#[test]
fn test_mz_with_and_without_mask() -> Result<()> {
    let env = TestEnv::new();
    let mut contents = b"MZ".to_vec();
    contents.extend_from_slice(&[0x90; 62]);
    let target = env.write_target("prog.exe", &contents);

    let exact = magic_record("exact", None, r"\x4d\x5a");
    let masked = FormatSpec {
        magic: Some(r"\x4d\x00".to_string()),
        mask: Some(r"\xff\x00".to_string()),
        interpreter: Some("/usr/bin/masked".to_string()),
        ..Default::default()
    }
    .build("masked")?;
    let wrong = magic_record("wrong", None, r"\x4d\x00");

    let resolver = Resolver::new(vec![exact, masked, wrong]);
    let resolved = resolver.resolve(&target, &|_: &str, _: &Path| true)?;

    assert_eq!(names(&resolved), vec!["exact", "masked"]);
    Ok(())
}

#[test]
fn test_offset_past_end_of_short_file() -> Result<()> {
    let env = TestEnv::new();
    let target = env.write_target("short", b"AB");

    let at_offset = FormatSpec {
        magic: Some("AB".to_string()),
        offset: Some("8".to_string()),
        interpreter: Some("/usr/bin/x".to_string()),
        ..Default::default()
    }
    .build("offset")?;

    let resolver = Resolver::new(vec![at_offset, magic_record("start", None, "AB")]);
    let resolved = resolver.resolve(&target, &|_: &str, _: &Path| true)?;

    assert_eq!(names(&resolved), vec!["start"]);
    Ok(())
}

#[test]
fn test_zero_length_file() -> Result<()> {
    let env = TestEnv::new();
    let target = env.write_target("empty.jar", b"");

    let resolver = Resolver::new(vec![
        magic_record("script", None, "#!"),
        magic_record("anything", None, ""),
        extension_record("jar", "jar"),
        extension_record("exe", "exe"),
    ]);
    let resolved = resolver.resolve(&target, &|_: &str, _: &Path| true)?;

    assert_eq!(names(&resolved), vec!["anything", "jar"]);
    Ok(())
}

#[test]
fn test_extension_needs_dot() -> Result<()> {
    let env = TestEnv::new();
    let no_dot = env.write_target("jar", b"PK");
    let trailing_dot = env.write_target("archive.", b"PK");

    let resolver = Resolver::new(vec![extension_record("jar", "jar")]);
    let accept = |_: &str, _: &Path| true;

    assert!(resolver.resolve(&no_dot, &accept)?.is_empty());
    assert!(resolver.resolve(&trailing_dot, &accept)?.is_empty());
    Ok(())
}

#[test]
fn test_extension_is_case_sensitive() -> Result<()> {
    let env = TestEnv::new();
    let target = env.write_target("app.JAR", b"PK");

    let resolver = Resolver::new(vec![extension_record("jar", "jar")]);
    assert!(resolver.resolve(&target, &|_: &str, _: &Path| true)?.is_empty());
    Ok(())
}

#[test]
fn test_missing_target_is_fatal() {
    let env = TestEnv::new();
    let resolver = Resolver::new(vec![magic_record("script", None, "#!")]);

    let err = resolver
        .resolve(&env.dir.path().join("missing"), &|_: &str, _: &Path| true)
        .unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_find_through_registry() -> Result<()> {
    let env = TestEnv::new();
    let registry = env.registry();
    registry.install(magic_record("shell", Some("pkg"), "#!"))?;
    registry.install(with_detector(magic_record("python", Some("pkg"), "#!"), "/detect/py"))?;
    registry.install(magic_record("wine", Some("pkg"), "MZ"))?;
    std::fs::write(env.paths.admindir.join("broken"), "pkg\nmagic\n")?;

    let target = env.write_target("script", b"#!/usr/bin/env python3\n");
    let detectors = ScriptedDetectors::new(vec!["/detect/py"]);

    let resolved = registry.find(&target, &detectors)?;

    assert_eq!(names(&resolved), vec!["python", "shell"]);
    Ok(())
}

#[test]
fn test_filtered_resolver_ignores_disabled_formats() -> Result<()> {
    let env = TestEnv::new();
    let registry = env.registry();
    registry.install(magic_record("enabled", None, "#!"))?;
    registry.install(magic_record("disabled", None, "#!"))?;
    registry.disable(Some("disabled"))?;

    let target = env.write_target("script", b"#!/bin/sh\n");
    let kernel = registry.kernel();
    let resolver = Resolver::from_store_filtered(registry.store(), |name| {
        kernel.entries.borrow().contains_key(name)
    })?;

    let resolved = resolver.resolve(&target, &|_: &str, _: &Path| true)?;
    assert_eq!(names(&resolved), vec!["enabled"]);
    Ok(())
}

#[test]
fn test_far_offset_record_is_skipped() -> Result<()> {
    let env = TestEnv::new();
    let target = env.write_target("script", b"#!/bin/sh\n");

    // Written by hand into the database, so never validated.
    let mut far = magic_record("far", None, "#!");
    far.offset = 18_446_744_073_709_551_000;

    let resolver = Resolver::new(vec![far, magic_record("sh", None, "#!")]);
    assert_eq!(resolver.len(), 1);

    let resolved = resolver.resolve(&target, &|_: &str, _: &Path| true)?;
    assert_eq!(names(&resolved), vec!["sh"]);
    Ok(())
}

#[test]
fn test_far_offset_record_file_is_skipped_by_find() -> Result<()> {
    let env = TestEnv::new();
    let registry = env.registry();
    registry.install(magic_record("sh", Some("pkg"), "#!"))?;
    std::fs::write(
        env.paths.admindir.join("far"),
        "pkg\nmagic\n18446744073709551000\n#!\n\n/usr/bin/far\n",
    )?;

    let target = env.write_target("script", b"#!/bin/sh\n");
    let resolved = registry.find(&target, &|_: &str, _: &Path| true)?;

    assert_eq!(names(&resolved), vec!["sh"]);
    Ok(())
}
