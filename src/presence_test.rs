use uuid::Uuid;

use super::*;

fn user(email: &str, name: Option<&str>) -> ActiveUser {
    ActiveUser {
        user_id: Uuid::new_v4(),
        email: email.to_owned(),
        name: name.map(ToOwned::to_owned),
        color: Some("#8a8178".to_owned()),
        cursor: None,
    }
}

#[test]
fn join_deduplicates_by_email() {
    let mut roster = Roster::new();
    let first = user("ada@example.com", Some("Ada"));
    let second = user("ada@example.com", Some("Ada (tab 2)"));
    let second_id = second.user_id;
    roster.join(first);
    roster.join(second);
    assert_eq!(roster.len(), 1);
    // The newest connection id wins.
    assert!(roster.get(second_id).is_some());
}

#[test]
fn leave_removes_by_connection_id() {
    let mut roster = Roster::new();
    let u = user("ada@example.com", Some("Ada"));
    let id = u.user_id;
    roster.join(u);
    roster.leave(id);
    assert!(roster.is_empty());
}

#[test]
fn replace_swaps_whole_roster() {
    let mut roster = Roster::new();
    roster.join(user("old@example.com", None));
    roster.replace(vec![user("a@example.com", None), user("b@example.com", None)]);
    assert_eq!(roster.len(), 2);
    assert!(roster.iter().all(|u| u.email != "old@example.com"));
}

#[test]
fn replace_deduplicates_by_email_too() {
    let mut roster = Roster::new();
    roster.replace(vec![user("a@example.com", None), user("a@example.com", None)]);
    assert_eq!(roster.len(), 1);
}

#[test]
fn set_cursor_updates_matching_user() {
    let mut roster = Roster::new();
    let u = user("ada@example.com", Some("Ada"));
    let id = u.user_id;
    roster.join(u);
    roster.set_cursor(id, CursorPosition { x: 5.0, y: 6.0 });
    let cursor = roster.get(id).unwrap().cursor.unwrap();
    assert!((cursor.x - 5.0).abs() < f64::EPSILON);
}

#[test]
fn display_name_prefers_name() {
    let u = user("ada@example.com", Some("Ada"));
    assert_eq!(u.display_name(), "Ada");
}

#[test]
fn display_name_falls_back_to_email_local_part() {
    let u = user("ada@example.com", None);
    assert_eq!(u.display_name(), "ada");
    let blank = user("grace@example.com", Some(""));
    assert_eq!(blank.display_name(), "grace");
}

#[test]
fn roster_display_name_falls_back_to_another_user() {
    let roster = Roster::new();
    assert_eq!(roster.display_name(Some(Uuid::new_v4())), "another user");
    assert_eq!(roster.display_name(None), "another user");
}

#[test]
fn active_user_serde_uses_camel_case() {
    let u = user("ada@example.com", Some("Ada"));
    let value = serde_json::to_value(&u).unwrap();
    assert!(value.get("userId").is_some());
    assert_eq!(value["email"], "ada@example.com");
}
