//! Database schema and record types

use super::error::{DbError, DbResult};
use super::row::Row;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::Serialize;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    nick TEXT UNIQUE NOT NULL,
    fullname TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS places (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    place_id INTEGER NOT NULL REFERENCES places (id),
    weekday INTEGER NOT NULL CHECK (weekday BETWEEN 0 AND 6),
    time TEXT NOT NULL,
    label TEXT,
    admin TEXT
);

CREATE TABLE IF NOT EXISTS buy_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_time TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users (id),
    canceled BOOLEAN NOT NULL DEFAULT 0,
    cancel_time TEXT
);

CREATE TABLE IF NOT EXISTS sell_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_time TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users (id),
    session_id INTEGER NOT NULL REFERENCES sessions (id),
    trade_in_date TEXT NOT NULL,
    buy_id INTEGER REFERENCES buy_records (id),
    canceled BOOLEAN NOT NULL DEFAULT 0,
    cancel_time TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sell_records_live
    ON sell_records (user_id, session_id, trade_in_date) WHERE canceled = 0;
CREATE INDEX IF NOT EXISTS idx_sell_records_date ON sell_records (trade_in_date);
CREATE INDEX IF NOT EXISTS idx_sessions_place ON sessions (place_id);
";

pub const USERS: &str = "users";
pub const PLACES: &str = "places";
pub const SESSIONS: &str = "sessions";
pub const BUY_RECORDS: &str = "buy_records";
pub const SELL_RECORDS: &str = "sell_records";

/// Chat participant; `id` is the external identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub nick: String,
    pub fullname: String,
}

impl User {
    pub const COLUMNS: [&'static str; 3] = ["id", "nick", "fullname"];

    pub fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.int("id")?,
            nick: row.text("nick")?,
            fullname: row.text("fullname")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Place {
    pub id: i64,
    pub name: String,
}

impl Place {
    pub const COLUMNS: [&'static str; 2] = ["id", "name"];

    pub fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.int("id")?,
            name: row.text("name")?,
        })
    }
}

/// Recurring weekly slot at a place
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: i64,
    pub place_id: i64,
    pub weekday: Weekday,
    pub time: String,
    pub label: Option<String>,
    /// Nick of the person coordinating this session, told about claims
    pub admin: Option<String>,
}

impl Session {
    pub const COLUMNS: [&'static str; 6] = ["id", "place_id", "weekday", "time", "label", "admin"];

    pub fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.int("id")?,
            place_id: row.int("place_id")?,
            weekday: weekday_from_sql(row.int("weekday")?)?,
            time: row.text("time")?,
            label: row.opt_text("label")?,
            admin: row.opt_text("admin")?,
        })
    }

    /// Human-readable name, e.g. "Adults Mon 07:00"
    pub fn title(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => format!("{label} {} {}", self.weekday, self.time),
            _ => format!("{} {}", self.weekday, self.time),
        }
    }
}

/// Offer to vacate a session on one calendar date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellRecord {
    pub id: i64,
    pub seller_id: i64,
    pub session_id: i64,
    pub trade_in_date: NaiveDate,
    pub buy_id: Option<i64>,
    pub canceled: bool,
    pub cancel_time: Option<DateTime<Utc>>,
}

impl SellRecord {
    pub const COLUMNS: [&'static str; 7] = [
        "id",
        "user_id",
        "session_id",
        "trade_in_date",
        "buy_id",
        "canceled",
        "cancel_time",
    ];

    pub fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.int("id")?,
            seller_id: row.int("user_id")?,
            session_id: row.int("session_id")?,
            trade_in_date: date_from_sql(&row.text("trade_in_date")?)?,
            buy_id: row.opt_int("buy_id")?,
            canceled: row.flag("canceled")?,
            cancel_time: row.opt_text("cancel_time")?.as_deref().map(parse_datetime),
        })
    }

    /// No buyer linked and not withdrawn
    #[allow(dead_code)] // Used in tests
    pub fn is_open(&self) -> bool {
        self.buy_id.is_none() && !self.canceled
    }
}

/// Claim against an offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuyRecord {
    pub id: i64,
    pub buyer_id: i64,
    pub canceled: bool,
    pub cancel_time: Option<DateTime<Utc>>,
}

impl BuyRecord {
    pub const COLUMNS: [&'static str; 4] = ["id", "user_id", "canceled", "cancel_time"];

    pub fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.int("id")?,
            buyer_id: row.int("user_id")?,
            canceled: row.flag("canceled")?,
            cancel_time: row.opt_text("cancel_time")?.as_deref().map(parse_datetime),
        })
    }
}

/// Dates are stored as ISO text so that text order is date order
pub fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn date_from_sql(text: &str) -> DbResult<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| DbError::internal(format!("malformed stored date {text:?}: {e}")))
}

pub fn weekday_to_sql(weekday: Weekday) -> i64 {
    i64::from(weekday.num_days_from_monday())
}

pub fn weekday_from_sql(value: i64) -> DbResult<Weekday> {
    const WEEK: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];
    usize::try_from(value)
        .ok()
        .and_then(|i| WEEK.get(i).copied())
        .ok_or_else(|| DbError::internal(format!("stored weekday out of range: {value}")))
}

pub fn now_to_sql() -> String {
    Utc::now().to_rfc3339()
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
