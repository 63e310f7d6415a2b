use std::fs;

use webin_loader::domain::Severity;
use webin_loader::webin::{
    COMPLETED_PREFIX, LogEntry, VALIDATED_MESSAGE, Verdict, evaluate_submission,
    evaluate_validation, parse_report,
};

#[test]
fn validation_verdicts() {
    let valid = parse_report(&format!("2025-06-06T12:55:57 INFO : {VALIDATED_MESSAGE}\n"));
    assert_eq!(evaluate_validation(valid).verdict, Verdict::Valid);

    let invalid = parse_report(concat!(
        "2025-06-06T12:55:57 ERROR: Invalid coverage value.\n",
        "2025-06-06T12:55:57 INFO : Submission(s) validated successfully.\n",
    ));
    let outcome = evaluate_validation(invalid);
    assert_eq!(outcome.verdict, Verdict::Invalid);
    assert_eq!(outcome.entries.len(), 2);

    let missing = evaluate_validation(vec![LogEntry::no_report()]);
    assert_eq!(missing.verdict, Verdict::Invalid);
}

#[test]
fn completed_submission_yields_last_token() {
    let report = format!("2025-07-02T14:43:24 INFO : {COMPLETED_PREFIX} ERZ26683413\n");
    assert_eq!(
        evaluate_submission(parse_report(&report)).verdict,
        Verdict::Submitted {
            accession: "ERZ26683413".to_string()
        }
    );
}

#[test]
fn already_submitted_analysis_is_adopted() {
    let report = concat!(
        "2025-07-02T14:43:20 INFO : Uploading file: /data/7.fa.gz\n",
        "2025-07-02T14:43:24 ERROR: In analysis, alias: \"webin-genome-mag_assembly_7\". ",
        "The object being added already exists in the submission account with accession: ",
        "\"ERZ26683413\". The submission has failed because of a system error.\n",
    );
    let outcome = evaluate_submission(parse_report(report));
    assert_eq!(
        outcome.verdict,
        Verdict::Submitted {
            accession: "ERZ26683413".to_string()
        }
    );
    assert_eq!(outcome.entries[1].severity, Severity::Error);
}

#[test]
fn other_errors_fail_submission() {
    let report = "2025-07-02T14:43:24 ERROR: The submission has failed because of a system error.\n";
    assert_eq!(evaluate_submission(parse_report(report)).verdict, Verdict::Failed);
    assert_eq!(
        evaluate_submission(vec![LogEntry::no_report()]).verdict,
        Verdict::Failed
    );
}

#[cfg(unix)]
#[test]
fn each_run_reads_the_report_of_its_own_directory() {
    use std::os::unix::fs::PermissionsExt;

    use webin_loader::config::Credentials;
    use webin_loader::domain::Environment;
    use webin_loader::webin::{ResourceLimits, SubmissionTool, WebinCli};

    let script = r#"#!/bin/sh
manifest=""
mode=""
while [ $# -gt 0 ]; do
  case "$1" in
    -manifest) manifest="$2"; shift ;;
    -validate) mode=validate ;;
    -submit) mode=submit ;;
  esac
  shift
done
[ -f "$manifest" ] || exit 3
name=$(basename "$manifest" .manifest.txt)
if [ "$mode" = validate ]; then
  echo "2025-06-06T12:55:57 INFO : Submission(s) validated successfully." > webin-cli.report
else
  echo "2025-06-06T12:56:10 INFO : The submission has been completed successfully. The following analysis accession was assigned to the submission: ERZ-$name" > webin-cli.report
fi
"#;
    let temp = tempfile::tempdir().unwrap();
    let program = temp.path().join("fake-webin-cli");
    fs::write(&program, script).unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

    let cli = WebinCli::with_program(program.clone(), Credentials::new("Webin-1", "secret"));
    let limits = ResourceLimits::default();
    for name in ["alpha", "beta"] {
        let dir = temp.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{name}.manifest.txt")), "STUDY   ERP1\n").unwrap();
    }

    let manifest = |name: &str| temp.path().join(name).join(format!("{name}.manifest.txt"));
    let (valid, _) = cli.validate(&manifest("alpha"), Environment::Dev, &limits);
    assert!(valid);
    let (alpha, _) = cli.submit(&manifest("alpha"), Environment::Dev, &limits);
    let (beta, _) = cli.submit(&manifest("beta"), Environment::Dev, &limits);

    assert_eq!(alpha.as_deref(), Some("ERZ-alpha"));
    assert_eq!(beta.as_deref(), Some("ERZ-beta"));
    assert!(temp.path().join("alpha").join("webin-cli.report").is_file());
    assert!(!temp.path().join("webin-cli.report").exists());
}

#[cfg(unix)]
#[test]
fn crashed_run_does_not_reuse_the_previous_report() {
    use std::os::unix::fs::PermissionsExt;

    use webin_loader::config::Credentials;
    use webin_loader::domain::Environment;
    use webin_loader::webin::{ResourceLimits, SubmissionTool, WebinCli};

    let temp = tempfile::tempdir().unwrap();
    let program = temp.path().join("crashing-webin-cli");
    fs::write(&program, "#!/bin/sh\nexit 1\n").unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

    let dir = temp.path().join("gamma");
    fs::create_dir_all(&dir).unwrap();
    let manifest = dir.join("gamma.manifest.txt");
    fs::write(&manifest, "STUDY   ERP1\n").unwrap();
    fs::write(
        dir.join("webin-cli.report"),
        format!("2025-06-06T12:56:10 INFO : {COMPLETED_PREFIX} ERZ0\n"),
    )
    .unwrap();

    let cli = WebinCli::with_program(program, Credentials::new("Webin-1", "secret"));
    let (accession, outcome) =
        cli.submit(&manifest, Environment::Dev, &ResourceLimits::default());
    assert_eq!(accession, None);
    assert_eq!(outcome.verdict, Verdict::Failed);
    assert_eq!(outcome.entries, vec![LogEntry::no_report()]);
    assert!(!dir.join("webin-cli.report").exists());
}
