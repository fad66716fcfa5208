//! Issue history: changelog entries from state events and system notes, and
//! issue links.
//!
//! GitLab keeps open/close history as structured state events, but every
//! other change only exists as the text of a system note such as
//! `changed title from **a** to **b**`. Notes whose text maps to no tracked
//! field are skipped.

use std::collections::BTreeMap;

use crate::api::types::{IssueLink, Note, StateEvent};
use crate::convert::{CLOSED_STATE, OPENED_STATE, Tenant};
use crate::sdk::ids;
use crate::sdk::{DateModel, IssueChangeLog, IssueChangeLogField, IssueLinkType, LinkedIssue};

/// Username to GitLab user ID.
pub type Usernames = BTreeMap<String, String>;

fn entry(ref_id: i64, field: IssueChangeLogField, user_id: String, at: DateModel) -> IssueChangeLog {
    IssueChangeLog {
        ref_id: ref_id.to_string(),
        field,
        from: String::new(),
        from_string: String::new(),
        to: String::new(),
        to_string: String::new(),
        user_id,
        created_date: Some(at),
        ordinal: 0,
    }
}

fn set_from(log: &mut IssueChangeLog, value: &str) {
    log.from = value.to_string();
    log.from_string = value.to_string();
}

fn set_to(log: &mut IssueChangeLog, value: &str) {
    log.to = value.to_string();
    log.to_string = value.to_string();
}

/// Status change of a state event. `None` for states issues never take.
pub fn state_event_entry(event: &StateEvent) -> Option<IssueChangeLog> {
    let (from, to) = match event.state.as_str() {
        "closed" => (OPENED_STATE, CLOSED_STATE),
        "reopened" => (CLOSED_STATE, OPENED_STATE),
        other => {
            tracing::debug!(event = event.id, state = other, "skipping state event");
            return None;
        }
    };
    let user = event.user.as_ref().map(|u| u.id.to_string()).unwrap_or_default();
    let mut log = entry(
        event.id,
        IssueChangeLogField::Status,
        user,
        DateModel::from_datetime(event.created_at),
    );
    set_from(&mut log, from);
    set_to(&mut log, to);
    Some(log)
}

/// `@username` mentions in note text, without the `@`.
fn mentions(body: &str) -> Vec<&str> {
    body.split('@')
        .skip(1)
        .map(|rest| {
            let end = rest
                .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.')))
                .unwrap_or(rest.len());
            rest[..end].trim_end_matches('.')
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Text between each pair of `**` markers.
fn bold_spans(body: &str) -> Vec<&str> {
    body.split("**").skip(1).step_by(2).collect()
}

/// Changelog entry of a system note. `None` for user comments and for
/// system notes about fields that are not tracked.
pub fn note_entry(note: &Note, usernames: &Usernames) -> Option<IssueChangeLog> {
    if !note.system {
        return None;
    }
    let body = note.body.trim();
    let user = note.author.id.to_string();
    let at = DateModel::from_datetime(note.created_at);
    let user_ref = |name: &str| usernames.get(name).cloned().unwrap_or_default();

    if let Some(rest) = body.strip_prefix("assigned to ") {
        let names = mentions(rest);
        let to = *names.first()?;
        let mut log = entry(note.id, IssueChangeLogField::AssigneeRefId, user, at);
        log.to = user_ref(to);
        log.to_string = to.to_string();
        if rest.contains("and unassigned")
            && let Some(&from) = names.get(1)
        {
            log.from = user_ref(from);
            log.from_string = from.to_string();
        }
        return Some(log);
    }
    if let Some(rest) = body.strip_prefix("unassigned ") {
        let from = *mentions(rest).first()?;
        let mut log = entry(note.id, IssueChangeLogField::AssigneeRefId, user, at);
        log.from = user_ref(from);
        log.from_string = from.to_string();
        return Some(log);
    }
    if let Some(date) = body.strip_prefix("changed due date to ") {
        let mut log = entry(note.id, IssueChangeLogField::DueDate, user, at);
        set_to(&mut log, date);
        return Some(log);
    }
    if body == "removed due date" {
        return Some(entry(note.id, IssueChangeLogField::DueDate, user, at));
    }
    if let Some(epic) = body.strip_prefix("added to epic ") {
        let mut log = entry(note.id, IssueChangeLogField::EpicId, user, at);
        set_to(&mut log, epic);
        return Some(log);
    }
    if let Some(change) = body.strip_prefix("changed epic to ") {
        let mut log = entry(note.id, IssueChangeLogField::EpicId, user, at);
        set_to(&mut log, change);
        return Some(log);
    }
    if let Some(epic) = body.strip_prefix("removed from epic ") {
        let mut log = entry(note.id, IssueChangeLogField::EpicId, user, at);
        set_from(&mut log, epic);
        return Some(log);
    }
    if body.starts_with("changed title") {
        let spans = bold_spans(body);
        let [from, to, ..] = spans.as_slice() else {
            tracing::debug!(note = note.id, body, "title change without both titles");
            return None;
        };
        let mut log = entry(note.id, IssueChangeLogField::Title, user, at);
        set_from(&mut log, from);
        set_to(&mut log, to);
        return Some(log);
    }

    tracing::debug!(note = note.id, body, "skipping system note");
    None
}

/// Full changelog of an issue, oldest first, numbered from 1.
pub fn issue_changelog(
    events: &[StateEvent],
    notes: &[Note],
    usernames: &Usernames,
) -> Vec<IssueChangeLog> {
    let mut entries: Vec<IssueChangeLog> = events
        .iter()
        .filter_map(state_event_entry)
        .chain(notes.iter().filter_map(|n| note_entry(n, usernames)))
        .collect();
    entries.sort_by_key(|e| e.created_date.as_ref().map(|d| d.epoch).unwrap_or_default());
    for (ordinal, entry) in entries.iter_mut().enumerate() {
        entry.ordinal = ordinal as i64 + 1;
    }
    entries
}

/// A linked issue. Link types other than blocks, is blocked by and relates
/// to are logged and skipped.
pub fn linked_issue(tenant: &Tenant, issue_iid: i64, link: &IssueLink) -> Option<LinkedIssue> {
    let (link_type, reverse_direction) = match link.link_type.as_str() {
        "blocks" => (IssueLinkType::Blocks, false),
        "is_blocked_by" => (IssueLinkType::Blocks, true),
        "relates_to" => (IssueLinkType::Relates, false),
        other => {
            tracing::warn!(issue_iid, link_type = other, "issue link not supported");
            return None;
        }
    };
    let issue_ref_id = link.id.to_string();
    Some(LinkedIssue {
        ref_id: link.issue_link_id.to_string(),
        issue_id: ids::issue_id(&tenant.customer_id, &issue_ref_id),
        issue_ref_id,
        issue_identifier: link.references.full.clone(),
        link_type,
        reverse_direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(id: i64, body: &str, minute: u32) -> Note {
        serde_json::from_value(json!({
            "id": id, "body": body, "author": { "id": 3 }, "system": true,
            "created_at": format!("2024-01-02T10:{minute:02}:00Z"),
            "updated_at": format!("2024-01-02T10:{minute:02}:00Z")
        }))
        .unwrap()
    }

    fn event(id: i64, state: &str, minute: u32) -> StateEvent {
        serde_json::from_value(json!({
            "id": id, "user": { "id": 4 }, "state": state,
            "created_at": format!("2024-01-02T10:{minute:02}:00Z")
        }))
        .unwrap()
    }

    fn usernames() -> Usernames {
        Usernames::from([("ann".to_string(), "21".to_string()), ("bob".to_string(), "22".to_string())])
    }

    #[test]
    fn state_events_become_status_changes() {
        let closed = state_event_entry(&event(1, "closed", 0)).unwrap();
        assert_eq!(closed.field, IssueChangeLogField::Status);
        assert_eq!((closed.from.as_str(), closed.to.as_str()), (OPENED_STATE, CLOSED_STATE));
        assert_eq!(closed.user_id, "4");

        let reopened = state_event_entry(&event(2, "reopened", 1)).unwrap();
        assert_eq!(reopened.to_string, OPENED_STATE);

        assert!(state_event_entry(&event(3, "merged", 2)).is_none());
    }

    #[test]
    fn assignee_notes_resolve_usernames() {
        let swap = note_entry(&note(1, "assigned to @ann and unassigned @bob", 0), &usernames()).unwrap();
        assert_eq!(swap.field, IssueChangeLogField::AssigneeRefId);
        assert_eq!((swap.to.as_str(), swap.to_string.as_str()), ("21", "ann"));
        assert_eq!((swap.from.as_str(), swap.from_string.as_str()), ("22", "bob"));

        let removed = note_entry(&note(2, "unassigned @bob", 0), &usernames()).unwrap();
        assert_eq!(removed.from, "22");
        assert!(removed.to.is_empty());

        let stranger = note_entry(&note(3, "assigned to @carol", 0), &usernames()).unwrap();
        assert_eq!((stranger.to.as_str(), stranger.to_string.as_str()), ("", "carol"));
    }

    #[test]
    fn title_due_date_and_epic_notes() {
        let title = note_entry(&note(1, "changed title from **Crash** to **Crash on start**", 0), &usernames())
            .unwrap();
        assert_eq!(title.field, IssueChangeLogField::Title);
        assert_eq!((title.from.as_str(), title.to.as_str()), ("Crash", "Crash on start"));

        let due = note_entry(&note(2, "changed due date to January 31, 2024", 0), &usernames()).unwrap();
        assert_eq!(due.field, IssueChangeLogField::DueDate);
        assert_eq!(due.to, "January 31, 2024");

        let added = note_entry(&note(3, "added to epic &5", 0), &usernames()).unwrap();
        assert_eq!((added.field, added.to.as_str()), (IssueChangeLogField::EpicId, "&5"));
        let removed = note_entry(&note(4, "removed from epic &5", 0), &usernames()).unwrap();
        assert_eq!(removed.from, "&5");
    }

    #[test]
    fn untracked_and_user_notes_are_skipped() {
        assert!(note_entry(&note(1, "changed the description", 0), &usernames()).is_none());
        assert!(note_entry(&note(2, "mentioned in merge request !4", 0), &usernames()).is_none());
        assert!(note_entry(&note(3, "changed title", 0), &usernames()).is_none());

        let mut comment = note(4, "assigned to @ann", 0);
        comment.system = false;
        assert!(note_entry(&comment, &usernames()).is_none());
    }

    #[test]
    fn changelog_is_ordered_and_numbered() {
        let log = issue_changelog(
            &[event(10, "closed", 5), event(11, "reopened", 9)],
            &[note(1, "assigned to @ann", 1), note(2, "changed the description", 2)],
            &usernames(),
        );
        let order: Vec<(&str, i64)> = log.iter().map(|e| (e.ref_id.as_str(), e.ordinal)).collect();
        assert_eq!(order, vec![("1", 1), ("10", 2), ("11", 3)]);
    }

    #[test]
    fn link_types_map_to_direction() {
        let tenant = Tenant::new("cust", None);
        let link = |link_type: &str| IssueLink {
            id: 90,
            issue_link_id: 5,
            link_type: link_type.to_string(),
            references: serde_json::from_value(json!({ "full": "acme/api#9" })).unwrap(),
        };

        let blocked = linked_issue(&tenant, 4, &link("is_blocked_by")).unwrap();
        assert_eq!(blocked.link_type, IssueLinkType::Blocks);
        assert!(blocked.reverse_direction);
        assert_eq!(blocked.ref_id, "5");
        assert_eq!(blocked.issue_id, ids::issue_id("cust", "90"));
        assert_eq!(blocked.issue_identifier, "acme/api#9");

        assert!(!linked_issue(&tenant, 4, &link("blocks")).unwrap().reverse_direction);
        assert_eq!(
            linked_issue(&tenant, 4, &link("relates_to")).unwrap().link_type,
            IssueLinkType::Relates
        );
        assert!(linked_issue(&tenant, 4, &link("duplicates")).is_none());
    }
}
