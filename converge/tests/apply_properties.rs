//! End-to-end properties of `apply` against temp project directories.
//!
//! Each test builds a small feature set in code, runs the full pipeline and
//! inspects the resulting files, cache and summary.

use serde::{Deserialize, Serialize};
use serde_json::json;

use converge::apply::{ApplyOptions, Config, apply};
use converge::core::codec::{JsonCodec, LinesCodec};
use converge::core::collect::{Content, GenerateFile, ModifyUserEditable};
use converge::core::dependency::EnsureDependency;
use converge::core::error::ApplyError;
use converge::core::feature::{FeatureDefinition, PeerContextMod};
use converge::core::types::FileAttributes;
use converge::test_support::{StaticRegistry, TestProject};

fn run(project: &TestProject, features: Vec<FeatureDefinition>) -> converge::apply::ApplyOutcome {
    apply(
        project.root(),
        &Config::new(features),
        &StaticRegistry::new([("prettier", "3.3.3")]),
        &ApplyOptions::default(),
    )
    .expect("apply")
}

fn appender(name: &str, after: &[&str], line: &'static str) -> FeatureDefinition {
    let owner = name == "a";
    FeatureDefinition::new(name, move |b, _| {
        if owner {
            b.generate_file("chain.txt", GenerateFile::new(format!("{line}\n")));
        } else {
            b.modify_generated_file("chain.txt", move |prev| format!("{prev}{line}\n"));
        }
        b.generate_file(&format!("{line}.txt"), GenerateFile::new(line));
        Ok(())
    })
    .after(after.iter().copied())
}

fn chain(order: &[&str]) -> Vec<FeatureDefinition> {
    order
        .iter()
        .map(|name| match *name {
            "a" => appender("a", &[], "a"),
            "b" => appender("b", &["a"], "b"),
            _ => appender("c", &["b"], "c"),
        })
        .collect()
}

#[test]
fn second_apply_performs_zero_writes() {
    let project = TestProject::new(json!({ "name": "demo" }));
    let first = run(&project, chain(&["a", "b", "c"]));
    assert_eq!(first.summary.created, 4);
    let cache_before = project.read(".converge/cache.json");

    let second = run(&project, chain(&["a", "b", "c"]));
    assert_eq!(second.summary.writes(), 0);
    assert_eq!(second.summary.unchanged, 4);
    assert_eq!(project.read(".converge/cache.json"), cache_before);
}

#[test]
fn result_is_independent_of_declaration_order() {
    let forward = TestProject::new(json!({ "name": "demo" }));
    let backward = TestProject::new(json!({ "name": "demo" }));
    run(&forward, chain(&["a", "b", "c"]));
    run(&backward, chain(&["c", "b", "a"]));

    assert_eq!(forward.files(), backward.files());
    for file in forward.files() {
        assert_eq!(forward.read(&file), backward.read(&file), "{file} differs");
    }
    assert_eq!(forward.read("chain.txt"), "a\nb\nc\n");
}

#[test]
fn manual_edit_is_preserved_and_reported_once() {
    let project = TestProject::new(json!({ "name": "demo" }));
    run(&project, chain(&["a", "b"]));
    project.write("chain.txt", "hand edit\n");

    let outcome = run(&project, chain(&["a", "b"]));
    assert_eq!(project.read("chain.txt"), "hand edit\n");
    assert_eq!(outcome.summary.needs_review, 1);
    let items = &outcome.summary.manual_review_items;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].path, "chain.txt");
    assert_eq!(items[0].features, vec!["a", "b"]);
}

#[test]
fn throw_on_manual_changes_aborts_before_any_write() {
    let project = TestProject::new(json!({ "name": "demo" }));
    run(&project, chain(&["a"]));
    project.write("chain.txt", "hand edit\n");

    let mut features = chain(&["a"]);
    features.push(FeatureDefinition::new("late", |b, _| {
        b.generate_file("late.txt", GenerateFile::new("late"));
        Ok(())
    }));
    let err = apply(
        project.root(),
        &Config::new(features),
        &StaticRegistry::new([]),
        &ApplyOptions {
            throw_on_manual_changes: true,
        },
    )
    .expect_err("manual changes");
    match err {
        ApplyError::ManualChanges { items } => assert_eq!(items[0].path, "chain.txt"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!project.exists("late.txt"));
}

#[test]
fn always_overwrite_replaces_manual_edit_with_warning() {
    let project = TestProject::new(json!({ "name": "demo" }));
    let features = || {
        vec![FeatureDefinition::new("lock", |b, _| {
            let attributes = FileAttributes {
                always_overwrite: true,
                ..FileAttributes::committed()
            };
            b.generate_file("locked.txt", GenerateFile::new("engine\n").attributes(attributes));
            Ok(())
        })]
    };
    run(&project, features());
    project.write("locked.txt", "hand edit\n");

    let outcome = run(&project, features());
    assert_eq!(project.read("locked.txt"), "engine\n");
    assert_eq!(outcome.summary.needs_review, 0);
    assert_eq!(outcome.summary.updated, 1);
    assert!(outcome.summary.warnings.iter().any(|w| w.contains("locked.txt")));
}

#[test]
fn cycle_fails_with_zero_writes() {
    let project = TestProject::new(json!({ "name": "demo" }));
    let features = vec![
        FeatureDefinition::new("a", |b, _| {
            b.generate_file("a.txt", GenerateFile::new("a"));
            Ok(())
        })
        .after(["b"]),
        FeatureDefinition::new("b", |b, _| {
            b.generate_file("b.txt", GenerateFile::new("b"));
            Ok(())
        })
        .after(["a"]),
    ];
    let err = apply(
        project.root(),
        &Config::new(features),
        &StaticRegistry::new([]),
        &ApplyOptions::default(),
    )
    .expect_err("cycle");
    let message = err.to_string();
    assert!(matches!(err, ApplyError::Scheduling { .. }));
    assert!(message.contains('a') && message.contains('b'), "{message}");
    assert_eq!(project.files(), vec!["package.json"]);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ListContext {
    list: Vec<u32>,
}

#[test]
fn recipe_observes_peer_context_after_contributors() {
    let project = TestProject::new(json!({ "name": "demo" }));
    let features = vec![
        FeatureDefinition::new("x", |b, ctx| {
            let first = ctx.get::<ListContext>()?;
            let again = ctx.get::<ListContext>()?;
            assert_eq!(first.list, again.list);
            b.generate_file(
                "x.json",
                GenerateFile::new(serde_json::to_string(&first.list)?),
            );
            Ok(())
        })
        .with_peer_context(&ListContext { list: vec![1] })
        .expect("seed"),
        FeatureDefinition::new("y", |b, _| {
            b.generate_file("y.txt", GenerateFile::new("y"));
            Ok(())
        })
        .after(["x"])
        .modify_peer_contexts(|_| {
            vec![PeerContextMod::typed("x", |mut ctx: ListContext| {
                ctx.list.push(2);
                ctx
            })]
        }),
    ];
    run(&project, features);
    assert_eq!(project.read("x.json"), "[1,2]");
}

#[test]
fn existing_dependency_is_left_alone() {
    let project = TestProject::new(json!({
        "name": "demo",
        "devDependencies": { "foo": "1.0.0" }
    }));
    let registry = StaticRegistry::new([("foo", "9.9.9")]);
    let features = vec![FeatureDefinition::new("needs-foo", |b, _| {
        b.ensure_dependency("foo", EnsureDependency::default());
        Ok(())
    })];
    let outcome = apply(
        project.root(),
        &Config::new(features),
        &registry,
        &ApplyOptions::default(),
    )
    .expect("apply");
    let manifest = project.manifest();
    assert_eq!(manifest["devDependencies"]["foo"], "1.0.0");
    assert!(manifest.get("dependencies").is_none());
    assert_eq!(registry.lookups(), 0);
    assert_eq!(outcome.summary.dependencies_added, 0);
}

#[test]
fn dependencies_are_added_once_and_recorded_as_managed() {
    let project = TestProject::new(json!({ "name": "demo" }));
    let features = || {
        vec![FeatureDefinition::new("fmt", |b, _| {
            b.ensure_dependency("prettier", EnsureDependency::dev());
            Ok(())
        })]
    };
    let first = run(&project, features());
    assert_eq!(first.summary.dependencies_added, 1);
    let manifest = project.manifest();
    assert_eq!(manifest["devDependencies"]["prettier"], "^3.3.3");
    assert_eq!(manifest["converge"]["managedDependencies"]["prettier"], "presence");

    let before = project.read("package.json");
    let second = run(&project, features());
    assert_eq!(second.summary.dependencies_added, 0);
    assert_eq!(project.read("package.json"), before);
}

#[test]
fn manifest_merge_and_dependencies_settle_in_one_run() {
    let project = TestProject::new(json!({ "name": "demo" }));
    let features = || {
        vec![FeatureDefinition::new("fmt", |b, _| {
            b.modify_user_editable_file(
                "package.json",
                ModifyUserEditable::new(JsonCodec, |mut value, _| {
                    value["scripts"]["format"] = json!("prettier --write .");
                    value
                }),
            );
            b.ensure_dependency("prettier", EnsureDependency::dev());
            Ok(())
        })]
    };

    let first = run(&project, features());
    let manifest = project.manifest();
    assert_eq!(manifest["scripts"]["format"], "prettier --write .");
    assert_eq!(manifest["devDependencies"]["prettier"], "^3.3.3");
    assert_eq!(first.summary.updated, 1);
    assert_eq!(first.summary.dependencies_added, 1);
    assert_eq!(first.summary.needs_review, 0);

    let manifest_before = project.read("package.json");
    let cache_before = project.read(".converge/cache.json");
    let second = run(&project, features());
    assert_eq!(second.summary.writes(), 0);
    assert_eq!(second.summary.needs_review, 0);
    assert_eq!(second.summary.dependencies_added, 0);
    assert_eq!(second.summary.dependencies_changed, 0);
    assert_eq!(project.read("package.json"), manifest_before);
    assert_eq!(project.read(".converge/cache.json"), cache_before);
}

#[test]
fn user_editable_keeps_human_fields() {
    let project = TestProject::new(json!({ "name": "demo" }));
    let features = || {
        vec![FeatureDefinition::new("settings", |b, _| {
            b.modify_user_editable_file(
                "settings.json",
                ModifyUserEditable::new(JsonCodec, |mut value, _| {
                    value["managed"] = json!(true);
                    value
                }),
            );
            Ok(())
        })]
    };
    run(&project, features());
    assert_eq!(project.read("settings.json"), "{\n  \"managed\": true\n}\n");

    project.write("settings.json", "{\n  \"mine\": 1,\n  \"managed\": false\n}\n");
    let outcome = run(&project, features());
    assert_eq!(
        project.read("settings.json"),
        "{\n  \"mine\": 1,\n  \"managed\": true\n}\n"
    );
    assert_eq!(outcome.summary.updated, 1);
    assert_eq!(outcome.summary.needs_review, 0);

    let settled = run(&project, features());
    assert_eq!(settled.summary.writes(), 0);
}

#[test]
fn gitignore_lists_only_non_committed_generated_paths() {
    let project = TestProject::new(json!({ "name": "demo" }));
    let features = vec![
        FeatureDefinition::new("gitignore", |b, _| {
            b.generate_file(
                ".gitignore",
                GenerateFile::new(Content::resolved(|registry, package| {
                    let mut out = String::new();
                    for path in registry.relative_paths(package, |entry| entry.attributes.gitignore) {
                        out.push_str(&path);
                        out.push('\n');
                    }
                    out
                }))
                .attributes(FileAttributes::committed()),
            );
            Ok(())
        })
        .after_all(),
        FeatureDefinition::new("editorconfig", |b, _| {
            b.modify_user_editable_file(
                ".editorconfig",
                ModifyUserEditable::new(LinesCodec, |value, _| {
                    if value.as_array().is_some_and(|lines| !lines.is_empty()) {
                        value
                    } else {
                        json!(["root = true"])
                    }
                }),
            );
            b.generate_file(".editorconfig-checker.json", GenerateFile::new("{}\n"));
            b.ignore_file("coverage");
            Ok(())
        }),
    ];
    run(&project, features);
    assert_eq!(
        project.read(".gitignore"),
        ".editorconfig-checker.json\ncoverage\n"
    );
    assert_eq!(project.read(".editorconfig"), "root = true\n");
}

#[test]
fn sub_package_files_land_in_package_directory() {
    let project = TestProject::new(json!({ "name": "mono", "workspaces": ["packages/*"] }));
    project.write_manifest("packages/web", &json!({ "name": "web" }));
    let features = vec![FeatureDefinition::new("ts", |b, _| {
        b.package("web")?
            .generate_file("tsconfig.json", GenerateFile::new("{}\n"));
        Ok(())
    })];
    let outcome = run(&project, features);
    assert_eq!(outcome.project.packages.len(), 1);
    assert_eq!(project.read("packages/web/tsconfig.json"), "{}\n");
}
