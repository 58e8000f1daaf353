use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use taskmerge_git::{
    ChangeKind, ConflictSource, GitCli, GitError, GitOid, GitQuery, GitWorktree,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn git(root: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn git {}: {e}", args.join(" ")));
    assert!(
        out.status.success(),
        "git {} failed:\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr),
    );
    String::from_utf8_lossy(&out.stdout).trim().to_owned()
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn commit_all(root: &Path, msg: &str) {
    git(root, &["add", "-A"]);
    git(root, &["commit", "--quiet", "-m", msg]);
}

/// A repo on `main` with `a.txt` and `dir/b.txt` committed.
fn setup_repo() -> (TempDir, GitCli) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    git(root, &["init", "--quiet"]);
    git(root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(root, &["config", "user.name", "Test"]);
    git(root, &["config", "user.email", "test@test.com"]);
    git(root, &["config", "commit.gpgsign", "false"]);
    write(root, "a.txt", "1\n");
    write(root, "dir/b.txt", "b\n");
    commit_all(root, "initial");
    let repo = GitCli::open(root).unwrap();
    (dir, repo)
}

/// Fork `task/x` from main, commit `task_edit` there, then commit
/// `main_edit` on main. Leaves main checked out.
fn diverge(root: &Path, task_edit: impl Fn(&Path), main_edit: impl Fn(&Path)) {
    git(root, &["checkout", "--quiet", "-b", "task/x"]);
    task_edit(root);
    commit_all(root, "task change");
    git(root, &["checkout", "--quiet", "main"]);
    main_edit(root);
    commit_all(root, "main change");
}

// ===========================================================================
// Queries
// ===========================================================================

#[test]
fn open_outside_repo_fails() {
    let dir = TempDir::new().unwrap();
    let err = GitCli::open(dir.path()).unwrap_err();
    assert!(matches!(err, GitError::NotARepository { .. }));
}

#[test]
fn current_branch_and_detached_head() {
    let (dir, repo) = setup_repo();
    assert_eq!(repo.current_branch().unwrap().as_deref(), Some("main"));

    git(dir.path(), &["checkout", "--quiet", "--detach"]);
    assert_eq!(repo.current_branch().unwrap(), None);
}

#[test]
fn rev_parse_opt_missing_is_none() {
    let (_dir, repo) = setup_repo();
    assert!(repo.rev_parse_opt("no-such-branch").unwrap().is_none());
    assert!(matches!(
        repo.rev_parse("no-such-branch"),
        Err(GitError::NotFound { .. })
    ));
    assert!(repo.rev_parse("main").is_ok());
}

#[test]
fn changed_files_only_reports_head_side() {
    let (dir, repo) = setup_repo();
    diverge(
        dir.path(),
        |root| {
            write(root, "new.txt", "task\n");
            write(root, "a.txt", "1\ntask\n");
            std::fs::remove_file(root.join("dir/b.txt")).unwrap();
        },
        |root| write(root, "main-only.txt", "main\n"),
    );

    let changes = repo.changed_files("main", "task/x").unwrap();
    let got: Vec<_> = changes
        .iter()
        .map(|e| (e.path.to_str().unwrap().to_owned(), e.kind))
        .collect();
    assert_eq!(
        got,
        vec![
            ("a.txt".to_owned(), ChangeKind::Modified),
            ("dir/b.txt".to_owned(), ChangeKind::Deleted),
            ("new.txt".to_owned(), ChangeKind::Added),
        ]
    );
}

#[test]
fn merge_base_is_fork_point() {
    let (dir, repo) = setup_repo();
    let fork = repo.rev_parse("main").unwrap();
    diverge(
        dir.path(),
        |root| write(root, "t.txt", "t\n"),
        |root| write(root, "m.txt", "m\n"),
    );
    assert_eq!(repo.merge_base("main", "task/x").unwrap(), Some(fork));
}

#[test]
fn content_at_distinguishes_absent_paths_and_directories() {
    let (_dir, repo) = setup_repo();
    assert_eq!(
        repo.content_at("main", Path::new("a.txt")).unwrap(),
        Some(b"1\n".to_vec())
    );
    assert_eq!(repo.content_at("main", Path::new("missing.txt")).unwrap(), None);
    assert_eq!(repo.content_at("main", Path::new("dir")).unwrap(), None);
    assert!(repo.content_at("no-such-ref", Path::new("a.txt")).is_err());
}

#[test]
fn detect_renames_reports_oldest_first() {
    let (dir, repo) = setup_repo();
    let root = dir.path();
    let fork = repo.rev_parse("main").unwrap().to_string();
    write(root, "dir/b.txt", "b\nline two\nline three\n");
    commit_all(root, "grow b");
    let grown = repo.rev_parse("main").unwrap().to_string();
    git(root, &["mv", "dir/b.txt", "dir/c.txt"]);
    commit_all(root, "rename b to c");
    std::fs::create_dir_all(root.join("moved")).unwrap();
    git(root, &["mv", "dir/c.txt", "moved/d.txt"]);
    commit_all(root, "rename c to d");

    let renames = repo.detect_renames(&fork, "main").unwrap();
    let pairs: Vec<_> = renames
        .iter()
        .map(|r| (r.from.clone(), r.to.clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (PathBuf::from("dir/b.txt"), PathBuf::from("dir/c.txt")),
            (PathBuf::from("dir/c.txt"), PathBuf::from("moved/d.txt")),
        ]
    );
    assert!(repo.detect_renames(&grown, &grown).unwrap().is_empty());
}

#[test]
fn dry_run_reports_conflicts_without_touching_worktree_or_index() {
    let (dir, repo) = setup_repo();
    let root = dir.path();
    diverge(
        root,
        |r| write(r, "a.txt", "1\ntask\n"),
        |r| write(r, "a.txt", "1\nbase\n"),
    );
    // Some unstaged and staged noise that must survive untouched.
    write(root, "dir/b.txt", "dirty\n");
    write(root, "staged.txt", "staged\n");
    git(root, &["add", "staged.txt"]);

    let status_before = git(root, &["status", "--porcelain"]);
    let head_before = git(root, &["rev-parse", "HEAD"]);
    let index_before = git(root, &["ls-files", "--stage"]);

    let check = repo.dry_run_conflict_check("main", "task/x").unwrap();
    assert!(check.has_conflicts);
    assert_eq!(check.conflicting_files, vec![PathBuf::from("a.txt")]);
    assert_eq!(check.source, ConflictSource::MergeTree);

    assert_eq!(git(root, &["status", "--porcelain"]), status_before);
    assert_eq!(git(root, &["rev-parse", "HEAD"]), head_before);
    assert_eq!(git(root, &["ls-files", "--stage"]), index_before);
    assert_eq!(std::fs::read_to_string(root.join("a.txt")).unwrap(), "1\nbase\n");
    assert_eq!(std::fs::read_to_string(root.join("dir/b.txt")).unwrap(), "dirty\n");
}

#[test]
fn dry_run_clean_merge_has_no_conflicts() {
    let (dir, repo) = setup_repo();
    diverge(
        dir.path(),
        |r| write(r, "t.txt", "t\n"),
        |r| write(r, "m.txt", "m\n"),
    );
    let check = repo.dry_run_conflict_check("main", "task/x").unwrap();
    assert!(!check.has_conflicts);
    assert!(check.conflicting_files.is_empty());
}

#[test]
fn both_sides_changed_over_reports_disjoint_hunks() {
    let (dir, repo) = setup_repo();
    let lines: Vec<String> = (1..=12).map(|i| format!("line {i}\n")).collect();
    write(dir.path(), "long.txt", &lines.concat());
    commit_all(dir.path(), "long file");
    diverge(
        dir.path(),
        |r| {
            let mut l = lines.clone();
            l[0] = "task edit\n".to_owned();
            write(r, "long.txt", &l.concat());
            write(r, "task-only.txt", "t\n");
        },
        |r| {
            let mut l = lines.clone();
            l[11] = "main edit\n".to_owned();
            write(r, "long.txt", &l.concat());
        },
    );

    // A real three-way merge folds the two hunks together.
    let exact = repo.dry_run_conflict_check("main", "task/x").unwrap();
    assert!(!exact.has_conflicts);

    let heuristic = repo.both_sides_changed("main", "task/x").unwrap();
    assert!(heuristic.has_conflicts);
    assert_eq!(heuristic.conflicting_files, vec![PathBuf::from("long.txt")]);
    assert_eq!(heuristic.source, ConflictSource::BothSidesChanged);
}

#[test]
fn sha256_repository_ids_parse() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    git(root, &["init", "--quiet", "--object-format=sha256"]);
    git(root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(root, &["config", "user.name", "Test"]);
    git(root, &["config", "user.email", "test@test.com"]);
    git(root, &["config", "commit.gpgsign", "false"]);
    write(root, "a.txt", "1\n");
    commit_all(root, "initial");
    let repo = GitCli::open(root).unwrap();
    diverge(
        root,
        |r| write(r, "a.txt", "1\ntask\n"),
        |r| write(r, "a.txt", "1\nbase\n"),
    );

    let head = repo.rev_parse("main").unwrap();
    assert!(matches!(head, GitOid::Sha256(_)));
    assert_eq!(head.to_string(), git(root, &["rev-parse", "main"]));

    let base = repo.merge_base("main", "task/x").unwrap().unwrap();
    assert_eq!(base.to_string().len(), 64);

    let check = repo.dry_run_conflict_check("main", "task/x").unwrap();
    assert_eq!(check.source, ConflictSource::MergeTree);
    assert_eq!(check.conflicting_files, vec![PathBuf::from("a.txt")]);
}

#[test]
fn merge_file_clean_and_conflicting() {
    let (_dir, repo) = setup_repo();
    let merged = repo
        .merge_file(b"a\nb\nc\n", b"A\nb\nc\n", b"a\nb\nC\n")
        .unwrap();
    assert_eq!(merged.as_deref(), Some(&b"A\nb\nC\n"[..]));

    let conflict = repo.merge_file(b"1\n", b"1\nbase\n", b"1\ntask\n").unwrap();
    assert_eq!(conflict, None);
}

#[test]
fn list_branches_filters_by_prefix() {
    let (dir, repo) = setup_repo();
    git(dir.path(), &["branch", "task/002-b"]);
    git(dir.path(), &["branch", "task/001-a"]);
    git(dir.path(), &["branch", "feature"]);
    assert_eq!(
        repo.list_branches("task/").unwrap(),
        vec!["task/001-a".to_owned(), "task/002-b".to_owned()]
    );
}

// ===========================================================================
// Mutations
// ===========================================================================

#[test]
fn stage_path_and_removal_update_index() {
    let (dir, repo) = setup_repo();
    let root = dir.path();
    write(root, "a.txt", "changed\n");
    repo.stage_path(Path::new("a.txt")).unwrap();
    std::fs::remove_file(root.join("dir/b.txt")).unwrap();
    repo.stage_removal(Path::new("dir/b.txt")).unwrap();
    // Removing a path the index never had is a no-op.
    repo.stage_removal(Path::new("never-existed.txt")).unwrap();

    let staged = git(root, &["diff", "--cached", "--name-status"]);
    assert!(staged.contains("M\ta.txt"), "{staged}");
    assert!(staged.contains("D\tdir/b.txt"), "{staged}");
}

#[test]
fn branch_and_worktree_lifecycle() {
    let (dir, repo) = setup_repo();
    let wt = dir.path().join(".worktrees").join("001-x");
    repo.create_branch("task/001-x", "main").unwrap();
    assert!(repo.create_branch("task/001-x", "main").is_err());
    repo.add_worktree(&wt, "task/001-x").unwrap();
    assert!(wt.join("a.txt").exists());

    repo.remove_worktree(&wt).unwrap();
    assert!(!wt.exists());
    repo.delete_branch("task/001-x").unwrap();
    assert!(repo.list_branches("task/").unwrap().is_empty());
}
