//! Stateless command protocol
//!
//! A conversation is a flat token string such as `sell,1,3,01.01.2030,Y`.
//! The first token is the verb; the number of tokens selects the stage.
//! Every menu option carries the full string for the next stage, so the
//! server keeps no conversation state.

mod dispatcher;
mod reply;
mod text;

#[cfg(test)]
mod proptests;

pub use dispatcher::{status_listing, Dispatcher, SystemClock};
pub use reply::Reply;

use crate::db::DbError;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DELIMITER: char = ',';
pub const DATE_FORMAT: &str = "%d.%m.%Y";
pub const CONFIRM_MARK: &str = "Y";

/// How many weekly dates the sell flow offers
pub const DATE_CHOICES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    Sell,
    Buy,
    Cancel,
    Status,
    About,
    Restart,
    Confirm,
    Reject,
}

impl Verb {
    pub const ALL: [Verb; 8] = [
        Verb::Sell,
        Verb::Buy,
        Verb::Cancel,
        Verb::Status,
        Verb::About,
        Verb::Restart,
        Verb::Confirm,
        Verb::Reject,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sell => "sell",
            Self::Buy => "buy",
            Self::Cancel => "cancel",
            Self::Status => "status",
            Self::About => "about",
            Self::Restart => "restart",
            Self::Confirm => "confirm",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownVerb(s.to_string()))
    }
}

/// Malformed command; always detected before the store is touched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("{verb} has no stage with {arity} tokens")]
    Arity { verb: Verb, arity: usize },
    #[error("expected a numeric id, got {0:?}")]
    BadId(String),
    #[error("expected a DD.MM.YYYY date, got {0:?}")]
    BadDate(String),
    #[error("expected confirmation marker, got {0:?}")]
    BadMark(String),
    #[error("expected s<id> or b<id>, got {0:?}")]
    BadItem(String),
}

impl From<ProtocolError> for DbError {
    fn from(err: ProtocolError) -> Self {
        DbError::invalid_data(err.to_string())
    }
}

/// Decoded token string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    pub verb: Verb,
    pub data: &'a str,
    tokens: Vec<&'a str>,
}

impl<'a> Command<'a> {
    /// Number of tokens, verb included
    pub fn arity(&self) -> usize {
        self.tokens.len()
    }

    fn token(&self, index: usize) -> Result<&'a str, ProtocolError> {
        self.tokens
            .get(index)
            .copied()
            .ok_or(ProtocolError::Arity {
                verb: self.verb,
                arity: self.tokens.len(),
            })
    }

    pub fn id(&self, index: usize) -> Result<i64, ProtocolError> {
        parse_id(self.token(index)?)
    }

    pub fn date(&self, index: usize) -> Result<NaiveDate, ProtocolError> {
        parse_date(self.token(index)?)
    }

    pub fn item(&self, index: usize) -> Result<CancelItem, ProtocolError> {
        self.token(index)?.parse()
    }

    pub fn confirmed(&self, index: usize) -> Result<(), ProtocolError> {
        let token = self.token(index)?;
        if token == CONFIRM_MARK {
            Ok(())
        } else {
            Err(ProtocolError::BadMark(token.to_string()))
        }
    }
}

pub fn decode(data: &str) -> Result<Command<'_>, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let tokens: Vec<&str> = data.split(DELIMITER).collect();
    let verb = tokens[0].parse()?;
    Ok(Command { verb, data, tokens })
}

/// Append one token
pub fn extend(data: &str, token: impl fmt::Display) -> String {
    format!("{data}{DELIMITER}{token}")
}

/// Drop the last `levels` tokens; `None` when that would remove the verb.
pub fn back(data: &str, levels: usize) -> Option<String> {
    let mut rest = data;
    for _ in 0..levels {
        rest = rest.rsplit_once(DELIMITER)?.0;
    }
    Some(rest.to_string())
}

/// Unsigned decimal id; signs, spaces and overflow are rejected
pub fn parse_id(token: &str) -> Result<i64, ProtocolError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::BadId(token.to_string()));
    }
    token
        .parse()
        .map_err(|_| ProtocolError::BadId(token.to_string()))
}

pub fn parse_date(token: &str) -> Result<NaiveDate, ProtocolError> {
    NaiveDate::parse_from_str(token, DATE_FORMAT)
        .map_err(|_| ProtocolError::BadDate(token.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// First date on or after `today` that falls on `weekday`
pub fn nearest_weekday(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (7 + weekday.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    today + Days::new(u64::from(ahead))
}

/// `count` consecutive weekly dates starting at the nearest `weekday`
pub fn upcoming_dates(today: NaiveDate, weekday: Weekday, count: usize) -> Vec<NaiveDate> {
    std::iter::successors(Some(nearest_weekday(today, weekday)), |date| {
        date.checked_add_days(Days::new(7))
    })
    .take(count)
    .collect()
}

/// Entry of the cancel menu: the user's own offer or a claim the user holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelItem {
    Offer(i64),
    Claim(i64),
}

impl CancelItem {
    /// Sell record the item refers to
    pub fn record(self) -> i64 {
        match self {
            Self::Offer(id) | Self::Claim(id) => id,
        }
    }
}

impl fmt::Display for CancelItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer(id) => write!(f, "s{id}"),
            Self::Claim(id) => write!(f, "b{id}"),
        }
    }
}

impl FromStr for CancelItem {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ProtocolError::BadItem(s.to_string());
        if let Some(id) = s.strip_prefix('s') {
            parse_id(id).map(Self::Offer).map_err(|_| bad())
        } else if let Some(id) = s.strip_prefix('b') {
            parse_id(id).map(Self::Claim).map_err(|_| bad())
        } else {
            Err(bad())
        }
    }
}

/// Who sent the update, as reported by the chat surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub fullname: String,
}

/// One inbound update: the decoded command and its sender
#[derive(Debug)]
pub struct Request<'a> {
    pub sender: &'a Sender,
    pub command: Command<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_decode() {
        let command = decode("sell,1,3").unwrap();
        assert_eq!(command.verb, Verb::Sell);
        assert_eq!(command.arity(), 3);
        assert_eq!(command.id(2).unwrap(), 3);

        assert_eq!(decode(""), Err(ProtocolError::Empty));
        assert_eq!(
            decode("trade,1"),
            Err(ProtocolError::UnknownVerb("trade".into()))
        );
        assert_eq!(
            decode("Sell"),
            Err(ProtocolError::UnknownVerb("Sell".into()))
        );
    }

    #[test]
    fn test_ids_are_plain_digits() {
        assert_eq!(parse_id("42"), Ok(42));
        for bad in ["", "-1", "+1", " 1", "1a", "٣", "99999999999999999999"] {
            assert_eq!(parse_id(bad), Err(ProtocolError::BadId(bad.into())), "{bad:?}");
        }
    }

    #[test]
    fn test_back() {
        assert_eq!(back("sell,1,3", 1).as_deref(), Some("sell,1"));
        assert_eq!(back("sell,1,3", 2).as_deref(), Some("sell"));
        assert_eq!(back("sell", 1), None);
        assert_eq!(back("sell,1", 0).as_deref(), Some("sell,1"));
    }

    #[test]
    fn test_dates() {
        assert_eq!(parse_date("01.01.2030"), Ok(date(2030, 1, 1)));
        assert!(parse_date("2030-01-01").is_err());
        assert!(parse_date("31.02.2030").is_err());
        assert_eq!(format_date(date(2030, 1, 8)), "08.01.2030");
    }

    #[test]
    fn test_upcoming_dates_start_at_nearest_weekday() {
        // 27.12.2029 is a Thursday
        let thursday = date(2029, 12, 27);
        assert_eq!(nearest_weekday(thursday, Weekday::Thu), thursday);
        assert_eq!(nearest_weekday(thursday, Weekday::Wed), date(2030, 1, 2));

        let dates = upcoming_dates(thursday, Weekday::Tue, DATE_CHOICES);
        assert_eq!(
            dates,
            vec![
                date(2030, 1, 1),
                date(2030, 1, 8),
                date(2030, 1, 15),
                date(2030, 1, 22)
            ]
        );
    }

    #[test]
    fn test_cancel_items() {
        assert_eq!("s12".parse::<CancelItem>(), Ok(CancelItem::Offer(12)));
        assert_eq!("b7".parse::<CancelItem>(), Ok(CancelItem::Claim(7)));
        assert_eq!(CancelItem::Claim(7).to_string(), "b7");
        for bad in ["", "s", "x1", "b-1", "sb1"] {
            assert!(bad.parse::<CancelItem>().is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_protocol_error_is_invalid_data() {
        let err: DbError = ProtocolError::BadId("x".into()).into();
        assert_eq!(err.status, crate::db::Status::InvalidData);
    }
}
