//! End-to-end tests for the `gitdep sync` command.
//!
//! Every test builds its upstream repositories locally with `git`, so no
//! network access is needed. Tests return early when `git` is not installed.

#[allow(dead_code)]
mod common;
use common::prelude::*;
use common::head_of;

fn manifest(entries: &[(&UpstreamRepository, &str)]) -> String {
    entries
        .iter()
        .map(|(repository, r#ref)| format!("{} {}\n", repository.url(), r#ref))
        .collect()
}

/// root -> x@v1, and x's manifest at v1 -> y@main.
fn chained() -> (UpstreamSet, UpstreamRepository, UpstreamRepository) {
    let upstream = UpstreamSet::new();
    let y = upstream.repository("y").commit("y1", &[("README", "y\n")]);
    let x = upstream.repository("x");
    let x_manifest = manifest(&[(&y, "main")]);
    let x = x.commit("v1", &[(".gitdeps", x_manifest.as_str())]);
    (upstream, x, y)
}

#[test]
fn test_sync_clones_transitive_dependencies() {
    if !git_available() {
        return;
    }
    let (_upstream, x, y) = chained();
    let fixture = TestFixture::new().with_manifest(&manifest(&[(&x, "v1")]));

    fixture
        .command()
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("cloned"))
        .stdout(predicate::str::contains("2 repositories in sync"));

    assert_eq!(head_of(&fixture.path().join("x")), x.rev_parse("v1"));
    assert_eq!(head_of(&fixture.path().join("y")), y.rev_parse("main"));
    fixture.child(".gitdeps.lock").assert(predicate::path::exists());
}

#[test]
fn test_second_sync_changes_nothing() {
    if !git_available() {
        return;
    }
    let (_upstream, x, _y) = chained();
    let fixture = TestFixture::new().with_manifest(&manifest(&[(&x, "v1")]));

    fixture.command().arg("sync").assert().success();
    let lockfile = std::fs::read_to_string(fixture.path().join(".gitdeps.lock")).unwrap();

    fixture
        .command()
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"))
        .stdout(predicate::str::contains("cloned").not())
        .stdout(predicate::str::contains("updated").not());

    let again = std::fs::read_to_string(fixture.path().join(".gitdeps.lock")).unwrap();
    assert_eq!(lockfile, again);
}

#[test]
fn test_sync_moves_branch_dependency_forward() {
    if !git_available() {
        return;
    }
    let (_upstream, x, y) = chained();
    let fixture = TestFixture::new().with_manifest(&manifest(&[(&x, "v1")]));
    fixture.command().arg("sync").assert().success();

    let newer = y.commit_untagged("y2", &[("README", "y two\n")]);

    fixture
        .command()
        .args(["sync", "--refresh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("updated"));
    assert_eq!(head_of(&fixture.path().join("y")), newer);
}

#[test]
fn test_cached_branch_is_kept_without_refresh() {
    if !git_available() {
        return;
    }
    let (_upstream, x, y) = chained();
    let fixture = TestFixture::new().with_manifest(&manifest(&[(&x, "v1")]));
    fixture.command().arg("sync").assert().success();
    let cached = head_of(&fixture.path().join("y"));

    y.commit_untagged("y2", &[("README", "y two\n")]);

    fixture
        .command()
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("updated").not());
    assert_eq!(head_of(&fixture.path().join("y")), cached);
}

#[test]
fn test_sync_dry_run_touches_nothing() {
    if !git_available() {
        return;
    }
    let (_upstream, x, _y) = chained();
    let fixture = TestFixture::new().with_manifest(&manifest(&[(&x, "v1")]));

    fixture
        .command()
        .args(["sync", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would clone"));

    fixture.child("x").assert(predicate::path::missing());
    fixture.child("y").assert(predicate::path::missing());
    fixture
        .child(".gitdeps.lock")
        .assert(predicate::path::missing());
}

#[test]
fn test_descendant_ref_wins() {
    if !git_available() {
        return;
    }
    let upstream = UpstreamSet::new();
    let lib = upstream
        .repository("lib")
        .commit("v1", &[("lib.txt", "one\n")])
        .commit("v2", &[("lib.txt", "two\n")]);
    let app_manifest = manifest(&[(&lib, "v1")]);
    let app = upstream
        .repository("app")
        .commit("v1", &[(".gitdeps", app_manifest.as_str())]);

    let fixture = TestFixture::new().with_manifest(&manifest(&[(&app, "v1"), (&lib, "v2")]));

    fixture.command().arg("sync").assert().success();
    assert_eq!(head_of(&fixture.path().join("lib")), lib.rev_parse("v2"));
}

#[test]
fn test_divergent_refs_abort_before_checkout() {
    if !git_available() {
        return;
    }
    let upstream = UpstreamSet::new();
    let lib = upstream.repository("lib").commit("v1", &[("lib.txt", "one\n")]);
    lib.branch("feature");
    let lib = lib.commit("v2", &[("lib.txt", "two\n")]);
    lib.switch("feature");
    lib.commit_untagged("f1", &[("feature.txt", "f\n")]);
    lib.switch("main");

    let app_manifest = manifest(&[(&lib, "feature")]);
    let app = upstream
        .repository("app")
        .commit("v1", &[(".gitdeps", app_manifest.as_str())]);

    let fixture = TestFixture::new().with_manifest(&manifest(&[(&app, "v1"), (&lib, "v2")]));

    fixture
        .command()
        .arg("sync")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("conflict for"))
        .stderr(predicate::str::contains("feature"))
        .stderr(predicate::str::contains("v2"));

    fixture.child("app").assert(predicate::path::missing());
    fixture.child("lib").assert(predicate::path::missing());
}

#[test]
fn test_cycle_through_root_repository_is_fatal() {
    if !git_available() {
        return;
    }
    let upstream = UpstreamSet::new();
    let root = upstream.repository("root").commit("r1", &[]);
    let b_manifest = manifest(&[(&root, "main")]);
    let b = upstream
        .repository("b")
        .commit("b1", &[(".gitdeps", b_manifest.as_str())]);
    let a_manifest = manifest(&[(&b, "main")]);
    let a = upstream
        .repository("a")
        .commit("a1", &[(".gitdeps", a_manifest.as_str())]);

    let fixture = TestFixture::new().with_manifest(&manifest(&[(&a, "main")]));

    fixture
        .command()
        .args(["sync", "--root-url", &root.url()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("dependency cycle"));

    fixture.child("a").assert(predicate::path::missing());
    fixture.child("b").assert(predicate::path::missing());
}

#[test]
fn test_layout_collision_is_fatal() {
    if !git_available() {
        return;
    }
    let upstream = UpstreamSet::new();
    let one = upstream.repository("one").commit("v1", &[]);
    let two = upstream.repository("two").commit("v1", &[]);

    let fixture = TestFixture::new().with_manifest(&format!(
        "{} v1 shared\n{} v1 shared\n",
        one.url(),
        two.url()
    ));

    fixture
        .command()
        .arg("sync")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("layout collision at"))
        .stderr(predicate::str::contains("shared"));

    fixture.child("shared").assert(predicate::path::missing());
}

#[test]
fn test_unknown_ref_is_reported() {
    if !git_available() {
        return;
    }
    let upstream = UpstreamSet::new();
    let lib = upstream.repository("lib").commit("v1", &[]);

    let fixture = TestFixture::new().with_manifest(&manifest(&[(&lib, "v9")]));

    fixture
        .command()
        .arg("sync")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ref 'v9' not found"));
}

#[test]
fn test_unreachable_repository_is_reported() {
    let fixture = TestFixture::new().with_manifest("/nonexistent/gitdep/repository main\n");
    if !git_available() {
        return;
    }

    fixture
        .command()
        .args(["sync", "--quiet"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unavailable during fetch"));
}

/// Exercises a public repository end to end.
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_sync_public_repository() {
    let fixture =
        TestFixture::new().with_manifest("https://github.com/rust-lang/rustlings.git main tools/rustlings\n");

    fixture
        .command()
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("rustlings"));
    fixture
        .child("tools/rustlings/.git")
        .assert(predicate::path::exists());
}
