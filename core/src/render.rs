/// Render-ready view of a conversation, bucketed by local day
use crate::message::{Message, SyncState};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum RenderedBody {
    /// Placeholder only; the stored body is never shown
    Deleted,
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyQuote {
    pub sender: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub id: String,
    pub body: RenderedBody,
    pub is_mine: bool,
    pub is_forwarded: bool,
    /// Optimistic, not yet confirmed
    pub is_pending: bool,
    pub is_unsynced: bool,
    pub reply: Option<ReplyQuote>,
    /// Local "HH:MM"
    pub time_label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    /// "Today", "Yesterday" or e.g. "Oct 3"
    pub label: String,
    pub messages: Vec<RenderedMessage>,
}

pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if Some(date) == today.checked_sub_signed(Duration::days(1)) {
        "Yesterday".to_string()
    } else {
        date.format("%b %-d").to_string()
    }
}

pub fn render_message(msg: &Message, viewer_email: &str, offset: FixedOffset) -> RenderedMessage {
    let local = msg.created_at.with_timezone(&offset);
    let is_mine = msg.sender_email.eq_ignore_ascii_case(viewer_email);

    if msg.is_deleted {
        return RenderedMessage {
            id: msg.id.clone(),
            body: RenderedBody::Deleted,
            is_mine,
            is_forwarded: false,
            is_pending: false,
            is_unsynced: msg.sync_state == SyncState::Unsynced,
            reply: None,
            time_label: local.format("%H:%M").to_string(),
            created_at: msg.created_at,
        };
    }

    RenderedMessage {
        id: msg.id.clone(),
        body: RenderedBody::Text(msg.message.clone()),
        is_mine,
        is_forwarded: msg.is_forwarded,
        is_pending: msg.optimistic,
        is_unsynced: msg.sync_state == SyncState::Unsynced,
        reply: msg.reply_to_message.as_ref().map(|text| ReplyQuote {
            sender: msg
                .reply_to_sender
                .clone()
                .unwrap_or_else(|| "Someone".to_string()),
            text: text.clone(),
        }),
        time_label: local.format("%H:%M").to_string(),
        created_at: msg.created_at,
    }
}

/// Group messages into local-day buckets, oldest first
pub fn group_by_day(
    messages: &[Message],
    viewer_email: &str,
    today: NaiveDate,
    offset: FixedOffset,
) -> Vec<DayBucket> {
    let mut buckets: Vec<DayBucket> = Vec::new();
    for msg in messages {
        let date = msg.created_at.with_timezone(&offset).date_naive();
        let rendered = render_message(msg, viewer_email, offset);
        match buckets.iter_mut().find(|b| b.date == date) {
            Some(b) => b.messages.push(rendered),
            None => buckets.push(DayBucket {
                date,
                label: day_label(date, today),
                messages: vec![rendered],
            }),
        }
    }
    buckets.sort_by_key(|b| b.date);
    buckets
}

/// Today's date at `offset`
pub fn today_at(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::message::{NewMessage, ReplyContext, SendExtra};
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, id: &str) -> Message {
        NewMessage::new("me@o.io", "you@o.io", Role::Worker, id, &SendExtra::default())
            .into_message(id.to_string(), Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap())
    }

    #[test]
    fn test_midnight_splits_buckets() {
        let msgs = vec![at(2024, 3, 9, 23, 59, "late"), at(2024, 3, 10, 0, 1, "early")];
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let buckets = group_by_day(&msgs, "me@o.io", today, offset_from_minutes(0));
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].label, "Yesterday");
        assert_eq!(buckets[0].messages[0].id, "late");
        assert_eq!(buckets[1].label, "Today");
        assert_eq!(buckets[1].messages[0].id, "early");
    }

    #[test]
    fn test_offset_moves_day_boundary() {
        // 23:30 UTC is already the next day at UTC+1
        let msgs = vec![at(2024, 3, 9, 22, 0, "a"), at(2024, 3, 9, 23, 30, "b")];
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let utc = group_by_day(&msgs, "me@o.io", today, offset_from_minutes(0));
        let plus_one = group_by_day(&msgs, "me@o.io", today, offset_from_minutes(60));
        assert_eq!(utc.len(), 1);
        assert_eq!(utc[0].label, "Mar 9");
        assert_eq!(plus_one.len(), 2);
        assert_eq!(plus_one[1].label, "Mar 10");
        assert_eq!(plus_one[1].messages[0].time_label, "00:30");
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_utc() {
        assert_eq!(offset_from_minutes(i32::MAX), Utc.fix());
        assert_eq!(offset_from_minutes(i32::MIN), Utc.fix());
        assert_eq!(offset_from_minutes(24 * 60), Utc.fix());
        assert_eq!(offset_from_minutes(-300).local_minus_utc(), -300 * 60);
    }

    #[test]
    fn test_deleted_body_is_hidden() {
        let mut m = at(2024, 3, 9, 10, 0, "secret");
        m.is_deleted = true;
        m.is_forwarded = true;
        let r = render_message(&m, "me@o.io", offset_from_minutes(0));
        assert_eq!(r.body, RenderedBody::Deleted);
        assert!(!r.is_forwarded);
        assert!(r.is_mine);
    }

    #[test]
    fn test_reply_quote_rendered() {
        let ctx = ReplyContext {
            message: "original".to_string(),
            sender: "Ana".to_string(),
        };
        let m = NewMessage::new("you@o.io", "me@o.io", Role::Admin, "answer", &SendExtra::reply(ctx))
            .into_message("r".to_string(), Utc::now());
        let r = render_message(&m, "me@o.io", offset_from_minutes(0));
        assert!(!r.is_mine);
        assert_eq!(
            r.reply,
            Some(ReplyQuote {
                sender: "Ana".to_string(),
                text: "original".to_string()
            })
        );
    }
}
