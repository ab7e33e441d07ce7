//! Ledger operations
//!
//! Enforces the marketplace invariants on top of the record store:
//! at most one live offer per (seller, session, date), exclusive claims,
//! and cancellation only along the seller/buyer link.

use crate::db::{
    date_to_sql, now_to_sql, BuyRecord, CompareOp, Condition, Database, DbError, DbResult, Insert,
    Join, Place, Select, SellRecord, Session, Store, Update, User, BUY_RECORDS, PLACES,
    SELL_RECORDS, SESSIONS, USERS,
};
use chrono::NaiveDate;

/// A sell record together with everything needed to describe it
#[derive(Debug, Clone)]
pub struct SupplyInfo {
    pub record: SellRecord,
    pub session: Session,
    pub place: Place,
    pub seller: User,
    pub buyer: Option<User>,
}

#[derive(Clone)]
pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // ==================== Users ====================

    /// Insert the user on first interaction, refresh nick and name afterwards
    pub fn register_user(&self, id: i64, nick: &str, fullname: &str) -> DbResult<User> {
        let nick = if nick.is_empty() {
            format!("id{id}")
        } else {
            nick.to_string()
        };

        self.db.write(|store| {
            release_nick(store, &nick, id)?;
            let known = store.exists(&Select::from(USERS).filter(Condition::eq("id", id)))?;
            if known {
                store.update(
                    &Update::table(USERS)
                        .set("nick", nick.as_str())
                        .set("fullname", fullname)
                        .filter(Condition::eq("id", id)),
                )?;
            } else {
                store.insert(
                    &Insert::into(USERS)
                        .value("id", id)
                        .value("nick", nick.as_str())
                        .value("fullname", fullname),
                )?;
                tracing::info!(user_id = id, nick = %nick, "Registered user");
            }
            Ok(User {
                id,
                nick: nick.clone(),
                fullname: fullname.to_string(),
            })
        })
    }

    pub fn user(&self, id: i64) -> DbResult<User> {
        self.db.read(|store| user_in(store, id))
    }

    pub fn user_by_nick(&self, nick: &str) -> DbResult<Option<User>> {
        let rows = self.db.select(
            &Select::from(USERS)
                .fields(User::COLUMNS)
                .filter(Condition::eq("nick", nick)),
        )?;
        rows.first().map(User::from_row).transpose()
    }

    // ==================== Catalog ====================

    pub fn places(&self) -> DbResult<Vec<Place>> {
        if let Some(places) = self.db.cache().places() {
            return Ok(places);
        }
        let rows = self
            .db
            .select(&Select::from(PLACES).fields(Place::COLUMNS).order_by("id"))?;
        let places = rows.iter().map(Place::from_row).collect::<DbResult<Vec<_>>>()?;
        self.db.cache().store_places(places.clone());
        Ok(places)
    }

    pub fn place(&self, id: i64) -> DbResult<Place> {
        self.places()?
            .into_iter()
            .find(|place| place.id == id)
            .ok_or_else(|| DbError::invalid_data(format!("unknown place {id}")))
    }

    pub fn sessions_of(&self, place_id: i64) -> DbResult<Vec<Session>> {
        let rows = self.db.select(
            &Select::from(SESSIONS)
                .fields(Session::COLUMNS)
                .filter(Condition::eq("place_id", place_id))
                .order_by("weekday")
                .order_by("time"),
        )?;
        let sessions = rows.iter().map(Session::from_row).collect::<DbResult<Vec<_>>>()?;
        for session in &sessions {
            self.db.cache().store_session(session.clone());
        }
        Ok(sessions)
    }

    pub fn session(&self, id: i64) -> DbResult<Session> {
        if let Some(session) = self.db.cache().session(id) {
            return Ok(session);
        }
        let session = self.db.read(|store| session_in(store, id))?;
        self.db.cache().store_session(session.clone());
        Ok(session)
    }

    // ==================== Records ====================

    #[allow(dead_code)] // Used in tests
    pub fn sell_record(&self, id: i64) -> DbResult<SellRecord> {
        self.db.read(|store| sell_record_in(store, id))
    }

    #[allow(dead_code)] // Used in tests
    pub fn buy_record(&self, id: i64) -> DbResult<BuyRecord> {
        let rows = self.db.select(
            &Select::from(BUY_RECORDS)
                .fields(BuyRecord::COLUMNS)
                .filter(Condition::eq("id", id)),
        )?;
        let row = rows
            .first()
            .ok_or_else(|| DbError::invalid_data(format!("unknown buy record {id}")))?;
        BuyRecord::from_row(row)
    }

    /// Sell record with its session, place, seller and live buyer
    pub fn supply(&self, id: i64) -> DbResult<SupplyInfo> {
        let (record, seller, buyer) = self.db.read(|store| {
            let record = sell_record_in(store, id)?;
            let seller = user_in(store, record.seller_id)?;
            let buyer = match record.buy_id {
                Some(buy_id) => {
                    let rows = store.select(
                        &Select::from(BUY_RECORDS)
                            .field("user_id")
                            .filter(Condition::eq("id", buy_id)),
                    )?;
                    match rows.first() {
                        Some(row) => Some(user_in(store, row.int("user_id")?)?),
                        None => None,
                    }
                }
                None => None,
            };
            Ok((record, seller, buyer))
        })?;
        let session = self.session(record.session_id)?;
        let place = self.place(session.place_id)?;
        Ok(SupplyInfo {
            record,
            session,
            place,
            seller,
            buyer,
        })
    }

    /// Offer `seller`'s slot in `session` on `date`; returns the new record id.
    pub fn add_sell(&self, session_id: i64, date: NaiveDate, seller: i64) -> DbResult<i64> {
        let stored_date = date_to_sql(date);
        let id = self.db.write(|store| {
            session_in(store, session_id)?;

            let live = Select::from(SELL_RECORDS)
                .filter(Condition::eq("user_id", seller))
                .filter(Condition::eq("session_id", session_id))
                .filter(Condition::eq("trade_in_date", stored_date.as_str()))
                .filter(Condition::eq("canceled", false));
            if store.exists(&live)? {
                return Err(DbError::record_exists(format!(
                    "user {seller} already offers session {session_id} on {date}"
                )));
            }

            store
                .insert(
                    &Insert::into(SELL_RECORDS)
                        .value("record_time", now_to_sql())
                        .value("user_id", seller)
                        .value("session_id", session_id)
                        .value("trade_in_date", stored_date.as_str())
                        .returning("id"),
                )?
                .int("id")
        })?;

        tracing::info!(record = id, seller, session_id, %date, "Sell record created");
        Ok(id)
    }

    /// Claim `seller`'s open offer for `buyer`; returns the new buy record id.
    ///
    /// The link is a conditional update on `buy_id IS NULL`: when a concurrent
    /// claim won the race, zero rows change and the whole transaction,
    /// including the buy record insert, rolls back.
    pub fn add_buy(
        &self,
        session_id: i64,
        date: NaiveDate,
        seller: i64,
        buyer: i64,
    ) -> DbResult<i64> {
        if seller == buyer {
            return Err(DbError::invalid_data(format!(
                "user {buyer} cannot claim their own offer"
            )));
        }
        let stored_date = date_to_sql(date);

        let buy_id = self.db.write(|store| {
            let held = Select::from(SELL_RECORDS)
                .join(Join::inner(BUY_RECORDS).on("buy_records.id", "sell_records.buy_id"))
                .filter(Condition::eq("sell_records.session_id", session_id))
                .filter(Condition::eq("sell_records.trade_in_date", stored_date.as_str()))
                .filter(Condition::eq("sell_records.canceled", false))
                .filter(Condition::eq("buy_records.user_id", buyer))
                .filter(Condition::eq("buy_records.canceled", false));
            if store.exists(&held)? {
                return Err(DbError::record_exists(format!(
                    "user {buyer} already holds session {session_id} on {date}"
                )));
            }

            let buy_id = store
                .insert(
                    &Insert::into(BUY_RECORDS)
                        .value("record_time", now_to_sql())
                        .value("user_id", buyer)
                        .returning("id"),
                )?
                .int("id")?;

            let claimed = store.update(
                &Update::table(SELL_RECORDS)
                    .set("buy_id", buy_id)
                    .filter(Condition::eq("user_id", seller))
                    .filter(Condition::eq("session_id", session_id))
                    .filter(Condition::eq("trade_in_date", stored_date.as_str()))
                    .filter(Condition::eq("canceled", false))
                    .filter(Condition::is_null("buy_id")),
            )?;

            if claimed == 0 {
                let live = Select::from(SELL_RECORDS)
                    .filter(Condition::eq("user_id", seller))
                    .filter(Condition::eq("session_id", session_id))
                    .filter(Condition::eq("trade_in_date", stored_date.as_str()))
                    .filter(Condition::eq("canceled", false));
                return Err(if store.exists(&live)? {
                    DbError::record_used(format!(
                        "session {session_id} on {date} from user {seller} is already claimed"
                    ))
                } else {
                    DbError::invalid_data(format!(
                        "user {seller} has no offer for session {session_id} on {date}"
                    ))
                });
            }
            Ok(buy_id)
        })?;

        tracing::info!(buy_id, seller, buyer, session_id, %date, "Buy record linked");
        Ok(buy_id)
    }

    /// Withdraw an open offer. A claimed offer reports `RecordUsed` whoever asks.
    pub fn cancel_sell(&self, record_id: i64, caller: i64) -> DbResult<()> {
        self.db.write(|store| {
            let record = live_sell_record_in(store, record_id)?;
            if record.buy_id.is_some() {
                return Err(DbError::record_used(format!(
                    "sell record {record_id} has a buyer"
                )));
            }
            if record.seller_id != caller {
                return Err(DbError::invalid_data(format!(
                    "user {caller} does not own sell record {record_id}"
                )));
            }

            let canceled = store.update(
                &Update::table(SELL_RECORDS)
                    .set("canceled", true)
                    .set("cancel_time", now_to_sql())
                    .filter(Condition::eq("id", record_id))
                    .filter(Condition::eq("canceled", false))
                    .filter(Condition::is_null("buy_id")),
            )?;
            if canceled == 0 {
                return Err(DbError::record_used(format!(
                    "sell record {record_id} changed while canceling"
                )));
            }
            Ok(())
        })?;

        tracing::info!(record = record_id, seller = caller, "Sell record canceled");
        Ok(())
    }

    /// Release a claim: cancel the buy record and reopen the offer together.
    pub fn cancel_buy(&self, record_id: i64, caller: i64) -> DbResult<()> {
        self.db.write(|store| {
            let record = live_sell_record_in(store, record_id)?;
            let buy_id = record.buy_id.ok_or_else(|| {
                DbError::invalid_data(format!("sell record {record_id} has no buyer"))
            })?;

            let rows = store.select(
                &Select::from(BUY_RECORDS)
                    .fields(BuyRecord::COLUMNS)
                    .filter(Condition::eq("id", buy_id))
                    .filter(Condition::eq("canceled", false)),
            )?;
            let buy = rows
                .first()
                .map(BuyRecord::from_row)
                .transpose()?
                .ok_or_else(|| DbError::invalid_data(format!("buy record {buy_id} is not live")))?;
            if buy.buyer_id != caller {
                return Err(DbError::invalid_data(format!(
                    "user {caller} does not hold buy record {buy_id}"
                )));
            }

            let released = store.update(
                &Update::table(BUY_RECORDS)
                    .set("canceled", true)
                    .set("cancel_time", now_to_sql())
                    .filter(Condition::eq("id", buy_id))
                    .filter(Condition::eq("canceled", false)),
            )?;
            let reopened = store.update(
                &Update::table(SELL_RECORDS)
                    .set("buy_id", Option::<i64>::None)
                    .filter(Condition::eq("id", record_id))
                    .filter(Condition::eq("buy_id", buy_id)),
            )?;
            if released != 1 || reopened != 1 {
                return Err(DbError::invalid_data(format!(
                    "claim {buy_id} on sell record {record_id} changed while canceling"
                )));
            }
            Ok(())
        })?;

        tracing::info!(record = record_id, buyer = caller, "Buy record canceled");
        Ok(())
    }
}

/// Nicks are unique, so a nick that changed hands is taken back from its stale
/// holder, who falls back to `id<their id>` until they talk to the bot again.
fn release_nick(store: &Store<'_>, nick: &str, owner: i64) -> DbResult<()> {
    let holders = store.select(
        &Select::from(USERS)
            .field("id")
            .filter(Condition::eq("nick", nick))
            .filter(Condition::compare("id", CompareOp::Ne, owner)),
    )?;
    for row in &holders {
        let holder = row.int("id")?;
        let fallback = free_nick(store, holder, nick)?;
        store.update(
            &Update::table(USERS)
                .set("nick", fallback.as_str())
                .filter(Condition::eq("id", holder)),
        )?;
        tracing::info!(
            user_id = holder,
            nick = %nick,
            fallback = %fallback,
            "Released stale nick"
        );
    }
    Ok(())
}

/// First of `id<id>`, `id<id>_2`, `id<id>_3`, ... that no other user holds
/// and that differs from the nick being released
fn free_nick(store: &Store<'_>, id: i64, released: &str) -> DbResult<String> {
    let base = format!("id{id}");
    let mut candidate = base.clone();
    let mut suffix = 1;
    while candidate == released
        || store.exists(
            &Select::from(USERS)
                .filter(Condition::eq("nick", candidate.as_str()))
                .filter(Condition::compare("id", CompareOp::Ne, id)),
        )?
    {
        suffix += 1;
        candidate = format!("{base}_{suffix}");
    }
    Ok(candidate)
}

fn user_in(store: &Store<'_>, id: i64) -> DbResult<User> {
    let rows = store.select(
        &Select::from(USERS)
            .fields(User::COLUMNS)
            .filter(Condition::eq("id", id)),
    )?;
    let row = rows
        .first()
        .ok_or_else(|| DbError::invalid_data(format!("unknown user {id}")))?;
    User::from_row(row)
}

fn session_in(store: &Store<'_>, id: i64) -> DbResult<Session> {
    let rows = store.select(
        &Select::from(SESSIONS)
            .fields(Session::COLUMNS)
            .filter(Condition::eq("id", id)),
    )?;
    let row = rows
        .first()
        .ok_or_else(|| DbError::invalid_data(format!("unknown session {id}")))?;
    Session::from_row(row)
}

fn sell_record_in(store: &Store<'_>, id: i64) -> DbResult<SellRecord> {
    let rows = store.select(
        &Select::from(SELL_RECORDS)
            .fields(SellRecord::COLUMNS)
            .filter(Condition::eq("id", id)),
    )?;
    let row = rows
        .first()
        .ok_or_else(|| DbError::invalid_data(format!("unknown sell record {id}")))?;
    SellRecord::from_row(row)
}

fn live_sell_record_in(store: &Store<'_>, id: i64) -> DbResult<SellRecord> {
    let record = sell_record_in(store, id)?;
    if record.canceled {
        return Err(DbError::invalid_data(format!("sell record {id} is canceled")));
    }
    Ok(record)
}
