//! Pure command grammar for inbound chat messages. No storage, no clocks;
//! dates parse to naive wall-clock values and get their timezone attached by
//! the dispatcher.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::domain::TaskId;

/// Splits `"/cmd@BotName args"` into a lowercased command and its trimmed
/// argument string. Returns `None` when the text does not start with `/` or
/// the command token is empty.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, args) = match rest.split_once(' ') {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let head = match head.find('@') {
        Some(at) => &head[..at],
        None => head,
    };
    if head.is_empty() {
        return None;
    }
    Some((head.to_lowercase(), args.to_owned()))
}

/// `add` arguments: either plain task text, or text followed by a strict
/// `YYYY-MM-DD HH:MM` pair. The text part must be non-empty either way.
pub fn parse_add_args(args: &str) -> Option<(String, Option<NaiveDateTime>)> {
    let args = args.trim();
    if args.is_empty() {
        return None;
    }
    let fields: Vec<&str> = args.split_whitespace().collect();
    if fields.len() >= 3 {
        let date = fields[fields.len() - 2];
        let time = fields[fields.len() - 1];
        if looks_like_date(date) && looks_like_time(time) {
            let at = parse_date_time(date, time)?;
            let text = fields[..fields.len() - 2].join(" ");
            if text.trim().is_empty() {
                return None;
            }
            return Some((text, Some(at)));
        }
    }
    Some((args.to_owned(), None))
}

/// `due` arguments: a positive task id followed by a strict date/time pair.
pub fn parse_due_args(args: &str) -> Option<(TaskId, NaiveDateTime)> {
    let fields: Vec<&str> = args.split_whitespace().collect();
    if fields.len() < 3 {
        return None;
    }
    let id = parse_id_arg(fields[0])?;
    if !looks_like_date(fields[1]) || !looks_like_time(fields[2]) {
        return None;
    }
    let at = parse_date_time(fields[1], fields[2])?;
    Some((id, at))
}

/// A single positive integer id.
pub fn parse_id_arg(args: &str) -> Option<TaskId> {
    let id: TaskId = args.trim().parse().ok()?;
    (id > 0).then_some(id)
}

fn parse_date_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    Some(date.and_time(time))
}

fn looks_like_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b.iter().enumerate().all(|(i, c)| match i {
            4 | 7 => *c == b'-',
            _ => c.is_ascii_digit(),
        })
}

fn looks_like_time(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 5
        && b.iter().enumerate().all(|(i, c)| match i {
            2 => *c == b':',
            _ => c.is_ascii_digit(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn command_marker_is_required() {
        assert_eq!(parse_command("add milk"), None);
        assert_eq!(parse_command("  hello"), None);
    }

    #[test]
    fn empty_command_token_is_not_a_command() {
        assert_eq!(parse_command("/"), None);
        assert_eq!(parse_command("/ list"), None);
        assert_eq!(parse_command("/@SomeBot hi"), None);
    }

    #[test]
    fn bot_suffix_is_stripped_and_command_lowercased() {
        assert_eq!(
            parse_command("/Add@SomeBot Buy milk"),
            Some(("add".into(), "Buy milk".into()))
        );
        assert_eq!(parse_command("/LIST"), Some(("list".into(), String::new())));
    }

    #[test]
    fn argument_string_is_trimmed() {
        assert_eq!(
            parse_command("/done   5 "),
            Some(("done".into(), "5".into()))
        );
    }

    #[test]
    fn add_with_trailing_date_time_splits_text() {
        assert_eq!(
            parse_add_args("buy milk 2026-01-02 10:00"),
            Some(("buy milk".into(), Some(naive(2026, 1, 2, 10, 0))))
        );
    }

    #[test]
    fn add_without_date_keeps_whole_text() {
        assert_eq!(parse_add_args("buy milk"), Some(("buy milk".into(), None)));
        // Shape mismatch on either token means everything is text.
        assert_eq!(
            parse_add_args("buy milk 2026-01-02 10am"),
            Some(("buy milk 2026-01-02 10am".into(), None))
        );
    }

    #[test]
    fn add_with_only_a_date_fails() {
        assert_eq!(parse_add_args("2026-01-02 10:00 2026-01-02 10:00"), None);
        assert_eq!(parse_add_args(""), None);
    }

    #[test]
    fn add_rejects_well_shaped_but_invalid_dates() {
        assert_eq!(parse_add_args("dentist 2026-13-02 10:00"), None);
        assert_eq!(parse_add_args("dentist 2026-01-02 25:00"), None);
    }

    #[test]
    fn due_requires_id_then_date_time() {
        assert_eq!(
            parse_due_args("3 2026-01-02 10:00"),
            Some((3, naive(2026, 1, 2, 10, 0)))
        );
        assert_eq!(parse_due_args("3 2026-01-02"), None);
        assert_eq!(parse_due_args("0 2026-01-02 10:00"), None);
        assert_eq!(parse_due_args("x 2026-01-02 10:00"), None);
    }

    #[test]
    fn ids_are_single_positive_integers() {
        assert_eq!(parse_id_arg(" 12 "), Some(12));
        assert_eq!(parse_id_arg("0"), None);
        assert_eq!(parse_id_arg("-4"), None);
        assert_eq!(parse_id_arg("12 13"), None);
        assert_eq!(parse_id_arg("abc"), None);
    }

    proptest! {
        #[test]
        fn text_without_marker_never_parses(text in "[^/\\s].*") {
            prop_assert_eq!(parse_command(&text), None);
        }

        #[test]
        fn positive_ids_round_trip(id in 1i64..=i64::MAX) {
            prop_assert_eq!(parse_id_arg(&id.to_string()), Some(id));
        }

        #[test]
        fn non_positive_ids_are_rejected(id in i64::MIN..=0i64) {
            prop_assert_eq!(parse_id_arg(&id.to_string()), None);
        }
    }
}
