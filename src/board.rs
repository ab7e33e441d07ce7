//! Status board: live offers and claims folded into a place → session → date tree

use crate::db::{
    date_from_sql, date_to_sql, CompareOp, Condition, Database, DbError, DbResult, Join, Place,
    Row, Select, Session, Store, User, BUY_RECORDS, PLACES, SELL_RECORDS, SESSIONS, USERS,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Which records a board shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyFilter {
    /// Every open offer and every live claim
    All,
    /// Offers nobody has claimed yet
    OpenOnly,
    /// The user's own open offers plus the claims the user holds
    OwnedBy(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusBoard {
    pub places: Vec<PlaceGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceGroup {
    pub place: Place,
    pub sessions: Vec<SessionGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionGroup {
    pub session: Session,
    pub dates: Vec<DateGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub supplies: Vec<Supply>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Supply {
    /// Sell record id
    pub id: i64,
    pub seller: User,
    pub buyer: Option<User>,
}

impl StatusBoard {
    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// Flattened view in board order
    pub fn supplies(&self) -> impl Iterator<Item = (&Place, &Session, NaiveDate, &Supply)> + '_ {
        self.places.iter().flat_map(|pg| {
            pg.sessions.iter().flat_map(move |sg| {
                sg.dates.iter().flat_map(move |dg| {
                    dg.supplies
                        .iter()
                        .map(move |supply| (&pg.place, &sg.session, dg.date, supply))
                })
            })
        })
    }

    fn push(&mut self, place: &Place, session: &Session, date: NaiveDate, supply: Supply) {
        let place_at = match self.places.iter().position(|g| g.place.id == place.id) {
            Some(i) => i,
            None => {
                self.places.push(PlaceGroup {
                    place: place.clone(),
                    sessions: Vec::new(),
                });
                self.places.len() - 1
            }
        };
        let sessions = &mut self.places[place_at].sessions;

        let session_at = match sessions.iter().position(|g| g.session.id == session.id) {
            Some(i) => i,
            None => {
                sessions.push(SessionGroup {
                    session: session.clone(),
                    dates: Vec::new(),
                });
                sessions.len() - 1
            }
        };
        let dates = &mut sessions[session_at].dates;

        match dates.iter_mut().find(|g| g.date == date) {
            Some(group) => group.supplies.push(supply),
            None => dates.push(DateGroup {
                date,
                supplies: vec![supply],
            }),
        }
    }
}

/// Ledger record as read for the board, before references are resolved
#[derive(Debug)]
struct Entry {
    id: i64,
    seller_id: i64,
    session_id: i64,
    date: NaiveDate,
    buyer_id: Option<i64>,
}

impl Entry {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.int("id")?,
            seller_id: row.int("seller_id")?,
            session_id: row.int("session_id")?,
            date: date_from_sql(&row.text("trade_in_date")?)?,
            buyer_id: row.opt_int("buyer_id")?,
        })
    }
}

/// Collect records dated on or after `start`.
pub fn collect(db: &Database, start: NaiveDate, filter: SupplyFilter) -> DbResult<StatusBoard> {
    db.read(|store| {
        let mut entries = Vec::new();
        if filter != SupplyFilter::OpenOnly {
            entries.extend(closed_deals(store, start, filter)?);
        }
        entries.extend(open_deals(store, start, filter)?);
        entries.sort_by_key(|e| (e.date, e.id));

        let user_ids: BTreeSet<i64> = entries
            .iter()
            .flat_map(|e| std::iter::once(e.seller_id).chain(e.buyer_id))
            .collect();
        let session_ids: BTreeSet<i64> = entries.iter().map(|e| e.session_id).collect();

        let users = lookup(store, USERS, &User::COLUMNS, &user_ids, User::from_row)?;
        let sessions = lookup(store, SESSIONS, &Session::COLUMNS, &session_ids, Session::from_row)?;
        let place_ids: BTreeSet<i64> = sessions.values().map(|s| s.place_id).collect();
        let places = lookup(store, PLACES, &Place::COLUMNS, &place_ids, Place::from_row)?;

        let mut board = StatusBoard::default();
        for entry in entries {
            let session = resolve(&sessions, entry.session_id, "session")?;
            let place = resolve(&places, session.place_id, "place")?;
            let seller = resolve(&users, entry.seller_id, "user")?.clone();
            let buyer = entry
                .buyer_id
                .map(|id| resolve(&users, id, "user").cloned())
                .transpose()?;
            board.push(
                place,
                session,
                entry.date,
                Supply {
                    id: entry.id,
                    seller,
                    buyer,
                },
            );
        }
        Ok(board)
    })
}

fn closed_deals(store: &Store<'_>, start: NaiveDate, filter: SupplyFilter) -> DbResult<Vec<Entry>> {
    let mut query = Select::from(SELL_RECORDS)
        .field_as("sell_records.id", "id")
        .field_as("sell_records.user_id", "seller_id")
        .field_as("sell_records.session_id", "session_id")
        .field_as("sell_records.trade_in_date", "trade_in_date")
        .field_as("buy_records.user_id", "buyer_id")
        .join(Join::inner(BUY_RECORDS).on("buy_records.id", "sell_records.buy_id"))
        .filter(Condition::compare(
            "sell_records.trade_in_date",
            CompareOp::Ge,
            date_to_sql(start),
        ))
        .filter(Condition::eq("sell_records.canceled", false))
        .filter(Condition::eq("buy_records.canceled", false));
    if let SupplyFilter::OwnedBy(user) = filter {
        query = query.filter(Condition::eq("buy_records.user_id", user));
    }
    store.select(&query)?.iter().map(Entry::from_row).collect()
}

fn open_deals(store: &Store<'_>, start: NaiveDate, filter: SupplyFilter) -> DbResult<Vec<Entry>> {
    let mut query = Select::from(SELL_RECORDS)
        .field("id")
        .field_as("user_id", "seller_id")
        .field("session_id")
        .field("trade_in_date")
        .field_as("buy_id", "buyer_id")
        .filter(Condition::compare("trade_in_date", CompareOp::Ge, date_to_sql(start)))
        .filter(Condition::eq("canceled", false))
        .filter(Condition::is_null("buy_id"));
    if let SupplyFilter::OwnedBy(user) = filter {
        query = query.filter(Condition::eq("user_id", user));
    }
    store.select(&query)?.iter().map(Entry::from_row).collect()
}

/// One `IN` query per referenced table
fn lookup<T>(
    store: &Store<'_>,
    table: &str,
    columns: &[&str],
    ids: &BTreeSet<i64>,
    parse: fn(&Row) -> DbResult<T>,
) -> DbResult<HashMap<i64, T>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let query = Select::from(table)
        .fields(columns.iter().copied())
        .filter(Condition::is_in("id", ids.iter().copied()));
    store
        .select(&query)?
        .iter()
        .map(|row| -> DbResult<(i64, T)> { Ok((row.int("id")?, parse(row)?)) })
        .collect()
}

fn resolve<'a, T>(found: &'a HashMap<i64, T>, id: i64, what: &str) -> DbResult<&'a T> {
    found
        .get(&id)
        .ok_or_else(|| DbError::internal(format!("{what} {id} referenced by ledger is missing")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::*;
    use crate::ledger::Ledger;

    fn board(ledger: &Ledger, filter: SupplyFilter) -> StatusBoard {
        collect(ledger.db(), date("01.01.2020"), filter).unwrap()
    }

    #[test]
    fn test_empty_ledger_gives_empty_board() {
        let ledger = ledger();
        assert!(board(&ledger, SupplyFilter::All).is_empty());
    }

    #[test]
    fn test_reopened_offer_groups_once() {
        // Sell, claim, release, claim again by someone else
        let ledger = ledger();
        let on = date("01.01.2030");
        let record = ledger.add_sell(1, on, ALICE).unwrap();
        ledger.add_buy(1, on, ALICE, BOB).unwrap();
        ledger.cancel_buy(record, BOB).unwrap();

        let open = board(&ledger, SupplyFilter::All);
        assert_eq!(open.places.len(), 1);
        assert_eq!(open.places[0].place.name, "North Pool");
        assert_eq!(open.places[0].sessions.len(), 1);
        assert_eq!(open.places[0].sessions[0].session.id, 1);
        let dates = &open.places[0].sessions[0].dates;
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].date, on);
        assert_eq!(dates[0].supplies.len(), 1, "seller must appear once");
        assert_eq!(dates[0].supplies[0].seller.nick, "alice");
        assert!(dates[0].supplies[0].buyer.is_none(), "canceled claim hidden");

        ledger.add_buy(1, on, ALICE, CAROL).unwrap();
        let closed = board(&ledger, SupplyFilter::All);
        let rows: Vec<_> = closed.supplies().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].3.buyer.as_ref().map(|u| u.id), Some(CAROL));
    }

    #[test]
    fn test_groups_follow_date_order() {
        let ledger = ledger();
        ledger.add_sell(3, date("12.01.2030"), BOB).unwrap();
        ledger.add_sell(1, date("08.01.2030"), ALICE).unwrap();
        ledger.add_sell(1, date("01.01.2030"), CAROL).unwrap();
        ledger.add_sell(2, date("03.01.2030"), ALICE).unwrap();

        let board = board(&ledger, SupplyFilter::All);
        let places: Vec<_> = board.places.iter().map(|p| p.place.name.as_str()).collect();
        assert_eq!(places, vec!["North Pool", "Lake Hall"]);

        let sessions: Vec<_> = board.places[0].sessions.iter().map(|s| s.session.id).collect();
        assert_eq!(sessions, vec![1, 2]);

        let first: Vec<_> = board.places[0].sessions[0]
            .dates
            .iter()
            .map(|d| d.date)
            .collect();
        assert_eq!(first, vec![date("01.01.2030"), date("08.01.2030")]);
    }

    #[test]
    fn test_start_date_is_inclusive() {
        let ledger = ledger();
        ledger.add_sell(1, date("31.12.2029"), ALICE).unwrap();
        ledger.add_sell(1, date("01.01.2030"), ALICE).unwrap();

        let board = collect(ledger.db(), date("01.01.2030"), SupplyFilter::All).unwrap();
        let dates: Vec<_> = board.supplies().map(|(_, _, d, _)| d).collect();
        assert_eq!(dates, vec![date("01.01.2030")]);
    }

    #[test]
    fn test_filters() {
        let ledger = ledger();
        let on = date("01.01.2030");
        ledger.add_sell(1, on, ALICE).unwrap();
        ledger.add_sell(2, on, ALICE).unwrap();
        ledger.add_sell(1, on, CAROL).unwrap();
        ledger.add_buy(2, on, ALICE, BOB).unwrap();

        let open = board(&ledger, SupplyFilter::OpenOnly);
        assert_eq!(open.supplies().count(), 2);
        assert!(open.supplies().all(|(_, _, _, s)| s.buyer.is_none()));

        let alice = board(&ledger, SupplyFilter::OwnedBy(ALICE));
        let alice_ids: Vec<_> = alice.supplies().map(|(_, _, _, s)| s.id).collect();
        assert_eq!(alice_ids, vec![1], "claimed offers are not the seller's to cancel");

        let bob = board(&ledger, SupplyFilter::OwnedBy(BOB));
        let held: Vec<_> = bob.supplies().collect();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].1.id, 2);
        assert_eq!(held[0].3.buyer.as_ref().map(|u| u.id), Some(BOB));

        assert_eq!(board(&ledger, SupplyFilter::All).supplies().count(), 3);
    }

    #[test]
    fn test_canceled_offers_are_hidden() {
        let ledger = ledger();
        let record = ledger.add_sell(1, date("01.01.2030"), ALICE).unwrap();
        ledger.cancel_sell(record, ALICE).unwrap();
        assert!(board(&ledger, SupplyFilter::All).is_empty());
    }
}
