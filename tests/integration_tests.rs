/// Integration tests for tidywatch
///
/// These tests drive the library the way the binary does, against a real
/// temporary folder.
///
/// Test categories:
/// 1. Bulk sorting
/// 2. Collisions and idempotence
/// 3. Retention sweeps
/// 4. Scheduler
/// 5. Live watching
/// 6. Filters and internal files
/// 7. Command line
use clap::Parser;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;
use tidywatch::cli::{Cli, CliError, run_cli};
use tidywatch::{AuditAction, Daemon, RuleError, WatcherState, WatcherStatus};

// ============================================================================
// Test Utilities
// ============================================================================

/// A temporary watched folder.
struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        TestFixture { temp_dir }
    }

    /// A fixture whose rules document is written before the daemon opens it.
    fn with_rules(rules_json: &str) -> Self {
        let fixture = Self::new();
        fixture.create_text_file("settings.json", rules_json);
        fixture
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn daemon(&self) -> Daemon {
        Daemon::open(self.path(), None).expect("Failed to open daemon")
    }

    fn create_text_file(&self, rel_path: &str, content: &str) {
        let path = self.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, content).expect("Failed to write file");
    }

    /// Back-dates the modification time of a file by `days`.
    fn age_file(&self, rel_path: &str, days: u64) {
        let when = SystemTime::now() - Duration::from_secs(days * 86_400);
        filetime::set_file_mtime(self.path().join(rel_path), FileTime::from_system_time(when))
            .expect("Failed to set mtime");
    }

    fn assert_file_exists(&self, rel_path: &str) {
        let path = self.path().join(rel_path);
        assert!(
            path.exists() && path.is_file(),
            "File should exist: {}",
            path.display()
        );
    }

    fn assert_file_not_exists(&self, rel_path: &str) {
        let path = self.path().join(rel_path);
        assert!(!path.exists(), "File should not exist: {}", path.display());
    }

    fn log_lines(&self) -> Vec<String> {
        match fs::read_to_string(self.path().join("file_organizer_log.txt")) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn count_log(&self, label: &str) -> usize {
        let needle = format!("] {} ", label);
        self.log_lines().iter().filter(|l| l.contains(&needle)).count()
    }

    /// Polls until `rel_path` exists or `timeout` elapses.
    fn wait_for(&self, rel_path: &str, timeout: Duration) -> bool {
        let path: PathBuf = self.path().join(rel_path);
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if path.exists() {
                return true;
            }
            thread::sleep(Duration::from_millis(25));
        }
        path.exists()
    }
}

const PDF_AND_JPG: &str = r#"{"PDFs": [".pdf"], "Images": [".jpg"]}"#;

// ============================================================================
// Test Suite 1: Bulk Sorting
// ============================================================================

#[test]
fn test_sort_report_and_photo() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("report.pdf", "%PDF-1.4");
    fixture.create_text_file("photo.jpg", "jpeg");

    let daemon = fixture.daemon();
    let records = daemon.initial_sort().unwrap();

    assert_eq!(records.len(), 2);
    fixture.assert_file_exists("PDFs/report.pdf");
    fixture.assert_file_exists("Images/photo.jpg");
    fixture.assert_file_not_exists("report.pdf");
    fixture.assert_file_not_exists("photo.jpg");
    assert_eq!(fixture.count_log("MOVED"), 2);
}

#[test]
fn test_sort_is_case_insensitive() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("upper.PDF", "x");
    fixture.create_text_file("mixed.JpG", "x");

    fixture.daemon().initial_sort().unwrap();

    fixture.assert_file_exists("PDFs/upper.PDF");
    fixture.assert_file_exists("Images/mixed.JpG");
}

#[test]
fn test_unmatched_file_is_left_in_place() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("notes.txt", "hello");
    fixture.create_text_file("Makefile", "all:");

    let records = fixture.daemon().initial_sort().unwrap();

    assert!(records.iter().all(|r| r.action == AuditAction::LeftUnmatched));
    fixture.assert_file_exists("notes.txt");
    fixture.assert_file_exists("Makefile");
    assert_eq!(fixture.count_log("UNMATCHED"), 2);
}

#[test]
fn test_defaults_are_written_on_first_open() {
    let fixture = TestFixture::new();
    let daemon = fixture.daemon();

    fixture.assert_file_exists("settings.json");
    fixture.assert_file_exists("user_settings.json");
    let rules: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(fixture.path().join("settings.json")).unwrap())
            .unwrap();
    assert_eq!(rules["PDFs"], serde_json::json!([".pdf"]));
    assert!(daemon.policy().scheduler_enabled);
    assert_eq!(daemon.policy().delete_after_days, 30);
}

#[test]
fn test_subdirectories_are_not_sorted() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("inbox/nested.pdf", "x");

    let records = fixture.daemon().initial_sort().unwrap();

    assert!(records.is_empty());
    fixture.assert_file_exists("inbox/nested.pdf");
}

// ============================================================================
// Test Suite 2: Collisions and Idempotence
// ============================================================================

#[test]
fn test_second_doc_gets_numbered_name() {
    let fixture = TestFixture::with_rules(r#"{"Data": [".csv"]}"#);
    let daemon = fixture.daemon();

    fixture.create_text_file("doc.csv", "first");
    daemon.initial_sort().unwrap();
    fixture.create_text_file("doc.csv", "second");
    daemon.initial_sort().unwrap();

    fixture.assert_file_exists("Data/doc.csv");
    fixture.assert_file_exists("Data/doc(1).csv");
    assert_eq!(
        fs::read_to_string(fixture.path().join("Data/doc.csv")).unwrap(),
        "first"
    );
    assert_eq!(
        fs::read_to_string(fixture.path().join("Data/doc(1).csv")).unwrap(),
        "second"
    );
}

#[test]
fn test_collision_skips_taken_numbers() {
    let fixture = TestFixture::with_rules(r#"{"Text": [".txt"]}"#);
    fixture.create_text_file("Text/a.txt", "0");
    fixture.create_text_file("Text/a(1).txt", "1");
    fixture.create_text_file("a.txt", "2");

    fixture.daemon().initial_sort().unwrap();

    fixture.assert_file_exists("Text/a(2).txt");
}

#[test]
fn test_sort_twice_is_noop() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("report.pdf", "x");
    let daemon = fixture.daemon();

    assert_eq!(daemon.initial_sort().unwrap().len(), 1);
    let lines_after_first = fixture.log_lines().len();
    assert!(daemon.initial_sort().unwrap().is_empty());
    assert_eq!(fixture.log_lines().len(), lines_after_first);
}

// ============================================================================
// Test Suite 3: Retention Sweeps
// ============================================================================

#[test]
fn test_sweep_thirty_days() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("PDFs/old.pdf", "x");
    fixture.create_text_file("PDFs/fresh.pdf", "x");
    fixture.age_file("PDFs/old.pdf", 31);
    fixture.age_file("PDFs/fresh.pdf", 29);

    let records = fixture.daemon().sweep();

    assert_eq!(records.len(), 1);
    fixture.assert_file_not_exists("PDFs/old.pdf");
    fixture.assert_file_exists("PDFs/fresh.pdf");
    assert_eq!(fixture.count_log("DELETED"), 1);
}

#[test]
fn test_sweep_never_touches_root_files() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("notes.txt", "x");
    fixture.age_file("notes.txt", 365);

    assert!(fixture.daemon().sweep().is_empty());
    fixture.assert_file_exists("notes.txt");
}

// ============================================================================
// Test Suite 4: Scheduler
// ============================================================================

#[test]
fn test_disabled_scheduler_writes_nothing() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file(
        "user_settings.json",
        r#"{"scheduler_enabled": false, "scheduler_interval_hours": 1}"#,
    );
    let daemon = fixture.daemon();
    fixture.create_text_file("report.pdf", "x");
    fixture.create_text_file("PDFs/old.pdf", "x");
    fixture.age_file("PDFs/old.pdf", 90);

    assert!(daemon.start_scheduler_with_unit(Duration::from_millis(20)).unwrap());
    thread::sleep(Duration::from_millis(200));
    daemon.shutdown();

    assert!(fixture.log_lines().is_empty());
    fixture.assert_file_exists("report.pdf");
    fixture.assert_file_exists("PDFs/old.pdf");
}

#[test]
fn test_scheduler_resorts_and_sweeps() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file(
        "user_settings.json",
        r#"{"scheduler_enabled": true, "scheduler_interval_hours": 1, "auto_delete_enabled": true, "delete_after_days": 7}"#,
    );
    let daemon = fixture.daemon();
    fixture.create_text_file("report.pdf", "x");
    fixture.create_text_file("Images/old.jpg", "x");
    fixture.age_file("Images/old.jpg", 8);

    daemon
        .start_scheduler_with_unit(Duration::from_millis(20))
        .unwrap();
    assert!(fixture.wait_for("PDFs/report.pdf", Duration::from_secs(5)));
    let deadline = Instant::now() + Duration::from_secs(5);
    while fixture.path().join("Images/old.jpg").exists() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    daemon.shutdown();

    fixture.assert_file_not_exists("Images/old.jpg");
}

// ============================================================================
// Test Suite 5: Live Watching
// ============================================================================

#[test]
fn test_watcher_sorts_new_file() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    let daemon = fixture.daemon();
    daemon.initial_sort().unwrap();

    assert_eq!(daemon.start().unwrap(), WatcherStatus::Started);
    assert_eq!(daemon.start().unwrap(), WatcherStatus::AlreadyRunning);
    fixture.create_text_file("a.pdf", "x");

    assert!(
        fixture.wait_for("PDFs/a.pdf", Duration::from_secs(10)),
        "watcher should have moved a.pdf"
    );
    fixture.assert_file_not_exists("a.pdf");

    assert_eq!(daemon.stop(), WatcherStatus::Stopped);
    assert_eq!(daemon.stop(), WatcherStatus::AlreadyStopped);
    assert_eq!(daemon.watcher_state(), WatcherState::Stopped);
}

#[test]
fn test_watcher_picks_up_rules_edits() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    let daemon = fixture.daemon();
    daemon.start().unwrap();

    fixture.create_text_file("settings.json", r#"{"Text": [".txt"]}"#);
    let deadline = Instant::now() + Duration::from_secs(10);
    while daemon.rules().category("Text").is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(25));
    }
    assert!(daemon.rules().category("Text").is_some());

    fixture.create_text_file("notes.txt", "x");
    assert!(fixture.wait_for("Text/notes.txt", Duration::from_secs(10)));
    daemon.shutdown();
}

#[test]
fn test_stopped_watcher_ignores_new_files() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    let daemon = fixture.daemon();
    daemon.start().unwrap();
    daemon.stop();

    fixture.create_text_file("late.pdf", "x");
    thread::sleep(Duration::from_millis(300));

    fixture.assert_file_exists("late.pdf");
}

// ============================================================================
// Test Suite 6: Filters and Internal Files
// ============================================================================

#[test]
fn test_internal_files_stay_put() {
    let fixture = TestFixture::with_rules(r#"{"Docs": [".json", ".txt"]}"#);
    let daemon = fixture.daemon();
    daemon.initial_sort().unwrap();
    fixture.create_text_file("data.json", "{}");
    daemon.initial_sort().unwrap();

    fixture.assert_file_exists("settings.json");
    fixture.assert_file_exists("user_settings.json");
    fixture.assert_file_exists("file_organizer_log.txt");
    fixture.assert_file_exists("Docs/data.json");
}

#[test]
fn test_filter_file_excludes_filename() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file(
        ".tidywatch.toml",
        "[filters]\n[filters.exclude]\nfilenames = [\"keep.pdf\"]\n",
    );
    fixture.create_text_file("keep.pdf", "x");
    fixture.create_text_file("move.pdf", "x");
    fixture.create_text_file(".hidden.pdf", "x");

    fixture.daemon().initial_sort().unwrap();

    fixture.assert_file_exists("keep.pdf");
    fixture.assert_file_exists(".hidden.pdf");
    fixture.assert_file_exists("PDFs/move.pdf");
}

#[test]
fn test_dry_run_moves_nothing() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("report.pdf", "x");
    fixture.create_text_file("notes.txt", "x");

    let plan = fixture.daemon().preview().unwrap();

    assert_eq!(plan.len(), 2);
    fixture.assert_file_exists("report.pdf");
    assert!(fixture.log_lines().is_empty());
}

// ============================================================================
// Test Suite 7: Command Line
// ============================================================================

fn cli(fixture: &TestFixture, args: &[&str]) -> Cli {
    let folder = fixture.path().to_string_lossy().to_string();
    let mut argv = vec!["tidywatch".to_string(), folder];
    argv.extend(args.iter().map(|a| a.to_string()));
    Cli::try_parse_from(argv).expect("Failed to parse arguments")
}

#[tokio::test]
async fn test_cli_rules_add_and_remove() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);

    run_cli(cli(&fixture, &["rules", "add", "Text", ".TXT", "md"]))
        .await
        .unwrap();
    let rules = fixture.daemon().rules();
    let text = rules.category("Text").expect("Text category should exist");
    assert_eq!(text.extensions, vec!["txt", "md"]);

    run_cli(cli(&fixture, &["rules", "remove", "Text", "md"]))
        .await
        .unwrap();
    assert_eq!(
        fixture.daemon().rules().category("Text").unwrap().extensions,
        vec!["txt"]
    );

    run_cli(cli(&fixture, &["rules", "remove", "Text"]))
        .await
        .unwrap();
    assert!(fixture.daemon().rules().category("Text").is_none());
}

#[tokio::test]
async fn test_cli_rejects_duplicate_extension() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    let result = run_cli(cli(&fixture, &["rules", "add", "Scans", "pdf"])).await;
    assert!(result.is_err());
    assert!(fixture.daemon().rules().category("Scans").is_none());
}

#[tokio::test]
async fn test_cli_rejects_unusable_extension() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    let result = run_cli(cli(&fixture, &["rules", "add", "Archives", "tar.gz"])).await;
    assert!(matches!(
        result,
        Err(CliError::Rules(RuleError::InvalidExtension { .. }))
    ));
    assert!(fixture.daemon().rules().category("Archives").is_none());
}

#[tokio::test]
async fn test_cli_settings_set() {
    let fixture = TestFixture::new();
    run_cli(cli(
        &fixture,
        &["settings", "set", "--scheduler-enabled", "false", "--delete-after-days", "7"],
    ))
    .await
    .unwrap();

    let policy = fixture.daemon().policy();
    assert!(!policy.scheduler_enabled);
    assert_eq!(policy.delete_after_days, 7);
    assert_eq!(policy.scheduler_interval_hours, 6);
}

#[tokio::test]
async fn test_cli_sort_and_log() {
    let fixture = TestFixture::with_rules(PDF_AND_JPG);
    fixture.create_text_file("report.pdf", "x");

    run_cli(cli(&fixture, &["sort"])).await.unwrap();
    run_cli(cli(&fixture, &["log", "-n", "5"])).await.unwrap();

    fixture.assert_file_exists("PDFs/report.pdf");
    assert_eq!(fixture.count_log("MOVED"), 1);
}

#[tokio::test]
async fn test_cli_missing_folder_fails() {
    let fixture = TestFixture::new();
    let missing = fixture.path().join("missing");
    let args = Cli::try_parse_from(["tidywatch", missing.to_str().unwrap(), "sort"]).unwrap();
    assert!(run_cli(args).await.is_err());
}
