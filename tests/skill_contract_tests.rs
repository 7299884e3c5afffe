//! Contract tests for skill bundles
//!
//! The SKILL.md invariants: front matter parses, the name sanitizes to the
//! skill's name, and learner file paths stay inside the bundle.

use lore::agent::skill_learner::{split_file_path, validate_file_path};
use lore::storage::skill::{parse_skill_md, sanitize_name};

const RESERVATION_SKILL: &str = r#"---
name: reservation-booking
description: Book restaurant reservations end to end
---

## Workflow

1. Search for candidate restaurants
2. Shortlist by the user's constraints
3. Confirm before booking
"#;

#[test]
fn skill_md_front_matter_parses_and_sanitizes_to_itself() {
    let (name, description) = parse_skill_md(RESERVATION_SKILL).unwrap();
    assert_eq!(name, "reservation-booking");
    assert_eq!(description, "Book restaurant reservations end to end");
    // Already-sanitized names are fixed points of the sanitizer
    assert_eq!(sanitize_name(&name), name);
}

#[test]
fn sanitizer_replaces_reserved_characters_and_whitespace() {
    assert_eq!(sanitize_name("api error handling"), "api-error-handling");
    assert_eq!(sanitize_name("a/b"), "a-b");
    assert_eq!(sanitize_name("win\\path:x*y?z"), "win-path-x-y-z");
    assert_eq!(sanitize_name("\"quoted\"<odd>|name"), "-quoted--odd--name");
}

#[test]
fn name_edits_are_detectable_against_the_stored_name() {
    // What str_replace_skill_file does for SKILL.md edits: re-parse and
    // compare sanitized names
    let stored_name = "reservation-booking";
    let edited = RESERVATION_SKILL.replace("name: reservation-booking", "name: table-booking");
    let (new_name, _) = parse_skill_md(&edited).unwrap();
    assert_ne!(sanitize_name(&new_name), stored_name);
}

#[test]
fn broken_front_matter_is_rejected() {
    assert!(parse_skill_md("").is_err());
    assert!(parse_skill_md("---\nname: [unterminated\n---\n").is_err());
    assert!(parse_skill_md("---\ndescription: missing name\n---\n").is_err());
}

#[test]
fn traversal_and_absolute_paths_are_rejected() {
    assert!(validate_file_path("../etc/passwd").is_some());
    assert!(validate_file_path("scripts/../../etc/passwd").is_some());
    assert!(validate_file_path("/etc/passwd").is_some());
    assert!(validate_file_path("scripts/main.py").is_none());
}

#[test]
fn file_paths_split_into_directory_and_filename() {
    assert_eq!(
        split_file_path("scripts/main.py"),
        ("scripts/".to_string(), "main.py".to_string())
    );
    assert_eq!(
        split_file_path("SKILL.md"),
        ("/".to_string(), "SKILL.md".to_string())
    );
}
