//! Static-validator invariants over whole plan documents.

use straylight::sandbox::validate_plan;

const CLEAN_PLAN: &str = r#"{"scrape_data": {
    "record_selector": "ul.stories li",
    "fields": {
        "title": {"selector": "a.storylink"},
        "points": {"selector": "span.score", "pattern": "([0-9]+)"}
    },
    "record_limit": 30
}}"#;

#[test]
fn clean_plan_is_executable() {
    let report = validate_plan(CLEAN_PLAN);
    assert!(report.is_executable());
    assert!(report.errors.is_empty());
    assert!(report.warnings.is_empty());
}

#[test]
fn forbidden_references_never_validate() {
    // Each smuggles one forbidden token somewhere in the document.
    let cases = [
        ("eval", r#"{"scrape_data": {"record_selector": "div[data-x=\"eval\"]", "fields": {"x": {}}}}"#),
        ("subprocess", r#"{"scrape_data": {"record_selector": "tr", "fields": {"x": {"selector": "td.subprocess"}}}}"#),
        ("pickle", r#"{"scrape_data": {"record_selector": "tr", "fields": {"pickle": {}}}}"#),
        ("os.system", r#"{"note": "os.system", "scrape_data": {"record_selector": "tr", "fields": {"x": {}}}}"#),
    ];

    for (token, source) in cases {
        let report = validate_plan(source);
        assert!(!report.no_forbidden_ops, "token {token} must be rejected");
        assert!(!report.is_executable());
        let security: Vec<_> = report
            .errors
            .iter()
            .filter(|e| e.starts_with("security:"))
            .collect();
        assert_eq!(security.len(), 1, "exactly one security error for {token}");
        assert!(security[0].contains(token));
    }
}

#[test]
fn validator_flags_are_deterministic_across_runs() {
    let sources = [
        CLEAN_PLAN,
        "{ not json",
        r#"{"scrape_data": {"record_selector": "tr", "fields": {"x": {"kind": "shell"}}}}"#,
        r#"{"wrong_entry": {}}"#,
    ];
    for source in sources {
        let first = validate_plan(source);
        for _ in 0..3 {
            assert_eq!(validate_plan(source), first);
        }
    }
}

#[test]
fn entry_shape_is_enforced() {
    // Missing record_selector.
    let report = validate_plan(r#"{"scrape_data": {"fields": {"x": {}}}}"#);
    assert!(!report.is_executable());

    // Fields present but empty.
    let report = validate_plan(r#"{"scrape_data": {"record_selector": "tr", "fields": {}}}"#);
    assert!(!report.entry_ok);

    // scrape_data not an object.
    let report = validate_plan(r#"{"scrape_data": "tr"}"#);
    assert!(!report.entry_ok);
}

#[test]
fn capability_errors_name_the_offending_kind() {
    let report = validate_plan(
        r#"{"scrape_data": {
            "record_selector": "tr",
            "fields": {
                "good": {"selector": "td"},
                "bad": {"kind": "xpath"}
            }
        }}"#,
    );
    assert!(!report.capabilities_ok);
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("xpath") && e.contains("bad")));
}
