//! Configuration cascade across a discovered project.

mod support;

use std::time::Duration;

use kip_core::config::{DEFAULT_TIMEOUT_SECS, EffectiveConfig, select_environment};
use kip_core::context::RunContext;
use kip_core::error::KipError;
use kip_core::project::Project;
use support::Fixture;

fn shop() -> Fixture {
    let fixture = Fixture::root(
        r#"defaultEnvironment = "staging"
repository = "r/"
extraBuildArgs = ["--build-arg", "TOKEN=${TOKEN}"]
timeoutSeconds = 120

[environments.prod]
repository = "r-prod/"
"#,
    );
    fixture
        .service("api", "")
        .service("web", "repository = \"w/\"\n")
        .service(
            "worker",
            "[environments.prod]\nextraBuildArgs = [\"--no-cache\"]\n",
        );
    fixture
}

#[test]
fn leaf_inherits_environment_override_from_root() {
    let fixture = shop();
    let project = Project::discover(fixture.path()).unwrap();
    let tree = project.tree();
    let api = tree.service("api").unwrap().id();
    let context = RunContext::default();

    assert_eq!(
        EffectiveConfig::resolve(tree, api, "dev", &context).repository,
        "r/"
    );
    assert_eq!(
        EffectiveConfig::resolve(tree, api, "prod", &context).repository,
        "r-prod/"
    );
}

#[test]
fn leaf_value_beats_parent_environment_override() {
    let fixture = shop();
    let project = Project::discover(fixture.path()).unwrap();
    let tree = project.tree();
    let web = tree.service("web").unwrap().id();

    let effective = EffectiveConfig::resolve(tree, web, "prod", &RunContext::default());
    assert_eq!(effective.repository, "w/");
}

#[test]
fn placeholders_are_substituted_from_context() {
    let fixture = shop();
    let project = Project::discover(fixture.path()).unwrap();
    let tree = project.tree();
    let api = tree.service("api").unwrap().id();
    let context = RunContext::from_vars([("TOKEN", "s3cret")]);

    let effective = EffectiveConfig::resolve(tree, api, "dev", &context);
    assert_eq!(effective.extra_build_args, vec!["--build-arg", "TOKEN=s3cret"]);
    assert_eq!(effective.timeout, Duration::from_secs(120));
}

#[test]
fn environment_specific_build_args_replace_inherited_ones() {
    let fixture = shop();
    let project = Project::discover(fixture.path()).unwrap();
    let tree = project.tree();
    let worker = tree.service("worker").unwrap().id();
    let context = RunContext::default();

    assert_eq!(
        EffectiveConfig::resolve(tree, worker, "prod", &context).extra_build_args,
        vec!["--no-cache"]
    );
    assert_eq!(
        EffectiveConfig::resolve(tree, worker, "dev", &context).extra_build_args,
        vec!["--build-arg", "TOKEN="]
    );
}

#[test]
fn default_environment_cascades_to_discovered_leaf() {
    let fixture = shop();
    let project = Project::discover(&fixture.service_dir("api")).unwrap();

    assert_eq!(project.focus().name(), "api");
    assert_eq!(
        select_environment(project.tree(), project.focus_id(), None),
        "staging"
    );
    assert_eq!(
        select_environment(project.tree(), project.focus_id(), Some("prod")),
        "prod"
    );
}

#[test]
fn standalone_leaf_falls_back_to_defaults() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("solo");
    support::write(&dir.join("kip.toml"), "kind = \"leaf\"\n");

    let project = Project::discover(&dir).unwrap();
    let effective = EffectiveConfig::resolve(
        project.tree(),
        project.focus_id(),
        "dev",
        &RunContext::default(),
    );
    assert_eq!(effective.repository, "");
    assert!(effective.extra_build_args.is_empty());
    assert_eq!(effective.build_path_template, "<leafDir>");
    assert_eq!(effective.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    assert_eq!(
        select_environment(project.tree(), project.focus_id(), None),
        "dev"
    );
}

#[test]
fn malformed_config_reports_the_file() {
    let fixture = Fixture::root("repository = [\n");
    let err = Project::discover(fixture.path()).unwrap_err();
    match err {
        KipError::ConfigParse { path, .. } => assert!(path.ends_with("kip.toml")),
        other => panic!("expected ConfigParse, got {other:?}"),
    }
}

#[test]
fn missing_project_is_reported() {
    let tmp = tempfile::TempDir::new().unwrap();
    let err = Project::discover(tmp.path()).unwrap_err();
    assert!(matches!(err, KipError::ProjectNotFound { .. }));
}
