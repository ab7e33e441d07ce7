//! Arity tables and stage handlers
//!
//! Each verb maps a token count to the handler for that stage. Handlers
//! parse every token before touching the ledger, so malformed input is
//! answered with `InvalidData` without a single query.

use super::reply::{Action, Reply};
use super::{
    back, decode, extend, format_date, text, upcoming_dates, CancelItem, ProtocolError, Request,
    Sender, Verb, CONFIRM_MARK, DATE_CHOICES,
};
use crate::board::{self, StatusBoard, SupplyFilter};
use crate::db::{DbError, DbResult, Place, Session, Status, User};
use crate::ledger::{Ledger, SupplyInfo};
use chrono::{Datelike, Local, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Source of the current date
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

type Handler = fn(&Dispatcher, &Request<'_>) -> DbResult<Reply>;
type ArityTable = HashMap<Verb, BTreeMap<usize, Handler>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("verb {0} has no stages")]
    Missing(Verb),
    #[error("stages of {verb} must be numbered 1..=n, found {arities:?}")]
    Gap { verb: Verb, arities: Vec<usize> },
}

fn stage(table: &mut ArityTable, verb: Verb, arity: usize, handler: Handler) {
    table.entry(verb).or_default().insert(arity, handler);
}

fn arity_table() -> ArityTable {
    let mut table = ArityTable::new();

    stage(&mut table, Verb::Sell, 1, Dispatcher::sell_places);
    stage(&mut table, Verb::Sell, 2, Dispatcher::sell_sessions);
    stage(&mut table, Verb::Sell, 3, Dispatcher::sell_dates);
    stage(&mut table, Verb::Sell, 4, Dispatcher::sell_confirm);
    stage(&mut table, Verb::Sell, 5, Dispatcher::sell_execute);

    stage(&mut table, Verb::Buy, 1, Dispatcher::buy_offers);
    stage(&mut table, Verb::Buy, 2, Dispatcher::buy_confirm);
    stage(&mut table, Verb::Buy, 3, Dispatcher::buy_request);

    stage(&mut table, Verb::Confirm, 3, Dispatcher::confirm);
    stage(&mut table, Verb::Reject, 3, Dispatcher::reject);

    stage(&mut table, Verb::Cancel, 1, Dispatcher::cancel_items);
    stage(&mut table, Verb::Cancel, 2, Dispatcher::cancel_confirm);
    stage(&mut table, Verb::Cancel, 3, Dispatcher::cancel_execute);

    stage(&mut table, Verb::Status, 1, Dispatcher::status);
    stage(&mut table, Verb::About, 1, Dispatcher::about);
    stage(&mut table, Verb::Restart, 1, Dispatcher::restart);

    table
}

/// Every verb needs stages, numbered from 1 without gaps.
///
/// `confirm` and `reject` arrive fully formed from a notification, so their
/// single stage sits at arity 3 and is exempt from the numbering rule.
fn validate(table: &ArityTable) -> Result<(), TableError> {
    for verb in Verb::ALL {
        let stages = table
            .get(&verb)
            .filter(|stages| !stages.is_empty())
            .ok_or(TableError::Missing(verb))?;
        if matches!(verb, Verb::Confirm | Verb::Reject) {
            continue;
        }
        let arities: Vec<usize> = stages.keys().copied().collect();
        if !arities.iter().copied().eq(1..=arities.len()) {
            return Err(TableError::Gap { verb, arities });
        }
    }
    Ok(())
}

pub struct Dispatcher {
    ledger: Ledger,
    clock: Arc<dyn Clock>,
    about: String,
    table: ArityTable,
}

impl Dispatcher {
    pub fn new(
        ledger: Ledger,
        clock: Arc<dyn Clock>,
        about: impl Into<String>,
    ) -> Result<Self, TableError> {
        Self::with_table(ledger, clock, about.into(), arity_table())
    }

    fn with_table(
        ledger: Ledger,
        clock: Arc<dyn Clock>,
        about: String,
        table: ArityTable,
    ) -> Result<Self, TableError> {
        validate(&table)?;
        Ok(Self {
            ledger,
            clock,
            about,
            table,
        })
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// First contact: remember the user and show the main menu
    pub fn start(&self, sender: &Sender) -> Reply {
        match self.register(sender) {
            Ok(user) => {
                tracing::debug!(user_id = user.id, nick = %user.nick, "Conversation started");
                main_menu()
            }
            Err(err) => self.report("start", &err),
        }
    }

    /// Answer one chosen action. Never fails: errors become user-facing text.
    pub fn dispatch(&self, sender: &Sender, data: &str) -> Reply {
        match self.route(sender, data) {
            Ok(reply) => reply,
            Err(err) => self.report(data, &err),
        }
    }

    fn route(&self, sender: &Sender, data: &str) -> DbResult<Reply> {
        let command = decode(data)?;
        let verb = command.verb;
        let arity = command.arity();
        let handler = self
            .table
            .get(&verb)
            .and_then(|stages| stages.get(&arity))
            .ok_or(ProtocolError::Arity { verb, arity })?;

        tracing::debug!(user_id = sender.id, %verb, arity, "Dispatching");
        handler(self, &Request { sender, command })
    }

    fn report(&self, data: &str, err: &DbError) -> Reply {
        if err.status == Status::InternalError {
            tracing::error!(request = %data, error = %err, "Request failed");
        } else {
            tracing::warn!(request = %data, error = %err, "Request rejected");
        }
        Reply::new(text::failure(err.status))
    }

    /// Live records from today on
    pub fn board(&self, filter: SupplyFilter) -> DbResult<StatusBoard> {
        board::collect(self.ledger.db(), self.today(), filter)
    }

    /// Status listing for group chats
    pub fn status_text(&self) -> String {
        match self.board(SupplyFilter::All) {
            Ok(board) => status_listing(&board),
            Err(err) => {
                tracing::error!(error = %err, "Failed to collect status");
                text::failure(err.status).to_string()
            }
        }
    }

    fn register(&self, sender: &Sender) -> DbResult<User> {
        self.ledger
            .register_user(sender.id, &sender.nick, &sender.fullname)
    }

    /// Session `session_id` provided it belongs to `place_id`
    fn session_at(&self, place_id: i64, session_id: i64) -> DbResult<(Place, Session)> {
        let session = self.ledger.session(session_id)?;
        if session.place_id != place_id {
            return Err(DbError::invalid_data(format!(
                "session {session_id} is not held at place {place_id}"
            )));
        }
        Ok((self.ledger.place(place_id)?, session))
    }

    /// Dates come from the menu, but the string may be stale or hand-made
    fn check_date(&self, session: &Session, date: NaiveDate) -> DbResult<()> {
        if date.weekday() != session.weekday {
            return Err(DbError::invalid_data(format!(
                "{date} is not a {} for session {}",
                session.weekday, session.id
            )));
        }
        if date < self.today() {
            return Err(DbError::invalid_data(format!("{date} is in the past")));
        }
        Ok(())
    }

    fn admin_of(&self, session: &Session) -> DbResult<Option<User>> {
        match session.admin.as_deref() {
            Some(nick) if !nick.is_empty() => self.ledger.user_by_nick(nick),
            _ => Ok(None),
        }
    }

    // ==================== sell ====================

    fn sell_places(&self, req: &Request<'_>) -> DbResult<Reply> {
        let data = req.command.data;
        let places = self.ledger.places()?;
        Ok(places
            .iter()
            .fold(Reply::new(text::CHOOSE_PLACE), |reply, place| {
                reply.action(&place.name, extend(data, place.id))
            }))
    }

    fn sell_sessions(&self, req: &Request<'_>) -> DbResult<Reply> {
        let data = req.command.data;
        let place_id = req.command.id(1)?;

        let place = self.ledger.place(place_id)?;
        let sessions = self.ledger.sessions_of(place.id)?;
        Ok(sessions
            .iter()
            .fold(Reply::new(text::CHOOSE_SESSION), |reply, session| {
                reply.action(session.title(), extend(data, session.id))
            })
            .back(back(data, 1)))
    }

    fn sell_dates(&self, req: &Request<'_>) -> DbResult<Reply> {
        let data = req.command.data;
        let place_id = req.command.id(1)?;
        let session_id = req.command.id(2)?;

        let (_, session) = self.session_at(place_id, session_id)?;
        let dates = upcoming_dates(self.today(), session.weekday, DATE_CHOICES);
        // The date is not a stage of its own, so back skips the session menu too
        Ok(dates
            .into_iter()
            .fold(Reply::new(text::CHOOSE_DATE), |reply, date| {
                reply.action(format_date(date), extend(data, format_date(date)))
            })
            .back(back(data, 2)))
    }

    fn sell_confirm(&self, req: &Request<'_>) -> DbResult<Reply> {
        let data = req.command.data;
        let place_id = req.command.id(1)?;
        let session_id = req.command.id(2)?;
        let date = req.command.date(3)?;

        let (place, session) = self.session_at(place_id, session_id)?;
        self.check_date(&session, date)?;
        let slot = text::slot(&place, &session, date);
        Ok(Reply::new(text::confirm_sell(&slot))
            .action(text::YES, extend(data, CONFIRM_MARK))
            .back(back(data, 1)))
    }

    fn sell_execute(&self, req: &Request<'_>) -> DbResult<Reply> {
        let place_id = req.command.id(1)?;
        let session_id = req.command.id(2)?;
        let date = req.command.date(3)?;
        req.command.confirmed(4)?;

        let seller = self.register(req.sender)?;
        let (place, session) = self.session_at(place_id, session_id)?;
        self.check_date(&session, date)?;
        let slot = text::slot(&place, &session, date);

        match self.ledger.add_sell(session.id, date, seller.id) {
            Ok(_) => Ok(Reply::new(text::sell_created(&slot))),
            Err(err) if err.status == Status::RecordExists => {
                Ok(Reply::new(text::sell_exists(&slot)))
            }
            Err(err) => Err(err),
        }
    }

    // ==================== buy ====================

    fn buy_offers(&self, req: &Request<'_>) -> DbResult<Reply> {
        let data = req.command.data;
        let board = self.board(SupplyFilter::OpenOnly)?;
        if board.is_empty() {
            return Ok(Reply::new(text::NO_OFFERS));
        }

        Ok(board
            .supplies()
            .filter(|(_, _, _, supply)| supply.seller.id != req.sender.id)
            .fold(
                Reply::new(text::board(text::CHOOSE_OFFER, &board)),
                |reply, (place, session, date, supply)| {
                    reply.action(
                        text::offer_button(place, session, date, &supply.seller),
                        extend(data, supply.id),
                    )
                },
            ))
    }

    /// Offer `record` as seen by a prospective buyer
    fn open_offer(&self, record: i64, buyer: i64) -> DbResult<SupplyInfo> {
        let info = self.ledger.supply(record)?;
        if info.record.canceled {
            return Err(DbError::invalid_data(format!("sell record {record} is canceled")));
        }
        if info.record.buy_id.is_some() {
            return Err(DbError::record_used(format!("sell record {record} is claimed")));
        }
        if info.seller.id == buyer {
            return Err(DbError::invalid_data(format!(
                "user {buyer} cannot claim their own offer"
            )));
        }
        Ok(info)
    }

    fn buy_confirm(&self, req: &Request<'_>) -> DbResult<Reply> {
        let data = req.command.data;
        let record = req.command.id(1)?;

        let info = self.open_offer(record, req.sender.id)?;
        let slot = supply_slot(&info);
        Ok(Reply::new(text::confirm_buy(&slot, &info.seller))
            .action(text::YES, extend(data, CONFIRM_MARK))
            .back(back(data, 1)))
    }

    /// Ask the seller to approve; the claim itself happens on `confirm`.
    fn buy_request(&self, req: &Request<'_>) -> DbResult<Reply> {
        let record = req.command.id(1)?;
        req.command.confirmed(2)?;

        let buyer = self.register(req.sender)?;
        let info = self.open_offer(record, buyer.id)?;
        let slot = supply_slot(&info);

        let decision = |verb: Verb| extend(&extend(verb.as_str(), record), buyer.id);
        let actions = vec![
            Action::new(text::ALLOW, decision(Verb::Confirm)),
            Action::new(text::DECLINE, decision(Verb::Reject)),
        ];

        tracing::info!(record, buyer = buyer.id, seller = info.seller.id, "Claim requested");
        Ok(Reply::new(text::buy_request_sent(&info.seller, &slot)).notify(
            info.seller.id,
            text::buy_request(&buyer, &slot),
            actions,
        ))
    }

    /// Seller's side of a claim: the caller must own the offer
    fn seller_decision(&self, req: &Request<'_>) -> DbResult<(SupplyInfo, User, User)> {
        let record = req.command.id(1)?;
        let buyer_id = req.command.id(2)?;

        let seller = self.register(req.sender)?;
        let info = self.ledger.supply(record)?;
        if info.seller.id != seller.id {
            return Err(DbError::invalid_data(format!(
                "user {} does not own sell record {record}",
                seller.id
            )));
        }
        let buyer = self.ledger.user(buyer_id)?;
        Ok((info, seller, buyer))
    }

    fn confirm(&self, req: &Request<'_>) -> DbResult<Reply> {
        let (info, seller, buyer) = self.seller_decision(req)?;
        let slot = supply_slot(&info);

        let claimed = self.ledger.add_buy(
            info.session.id,
            info.record.trade_in_date,
            seller.id,
            buyer.id,
        );
        let failure = match claimed {
            Ok(_) => {
                let admin = self.admin_of(&info.session)?;
                let mut reply = Reply::new(text::buy_done(&slot, &buyer)).notify(
                    buyer.id,
                    text::admin_told(text::buy_confirmed(&slot, &seller), admin.as_ref()),
                    Vec::new(),
                );
                if let Some(admin) = admin {
                    reply = reply.notify(admin.id, text::admin_swap(&slot, &seller, &buyer), Vec::new());
                }
                return Ok(reply);
            }
            Err(err) => err,
        };

        let reason = match failure.status {
            Status::RecordExists => text::buyer_busy(&buyer),
            Status::RecordUsed => {
                let holder = self.ledger.supply(info.record.id)?.buyer;
                text::slot_taken(holder.as_ref())
            }
            Status::InvalidData => text::offer_gone(&slot),
            _ => return Err(failure),
        };
        tracing::info!(record = info.record.id, buyer = buyer.id, status = %failure.status, "Claim dropped");
        Ok(Reply::new(reason).notify(
            buyer.id,
            text::claim_declined(&slot, &seller),
            Vec::new(),
        ))
    }

    fn reject(&self, req: &Request<'_>) -> DbResult<Reply> {
        let (info, seller, buyer) = self.seller_decision(req)?;
        let slot = supply_slot(&info);

        tracing::info!(record = info.record.id, buyer = buyer.id, "Claim declined");
        Ok(Reply::new(text::request_declined(&slot, &buyer)).notify(
            buyer.id,
            text::claim_declined(&slot, &seller),
            Vec::new(),
        ))
    }

    // ==================== cancel ====================

    fn cancel_items(&self, req: &Request<'_>) -> DbResult<Reply> {
        let data = req.command.data;
        let board = self.board(SupplyFilter::OwnedBy(req.sender.id))?;
        if board.is_empty() {
            return Ok(Reply::new(text::NOTHING_TO_CANCEL));
        }

        Ok(board.supplies().fold(
            Reply::new(text::board(text::CHOOSE_CANCEL, &board)),
            |reply, (place, session, date, supply)| {
                let item = if supply.buyer.is_some() {
                    CancelItem::Claim(supply.id)
                } else {
                    CancelItem::Offer(supply.id)
                };
                reply.action(
                    text::cancel_button(supply.buyer.is_some(), place, session, date),
                    extend(data, item),
                )
            },
        ))
    }

    fn cancel_confirm(&self, req: &Request<'_>) -> DbResult<Reply> {
        let data = req.command.data;
        let item = req.command.item(1)?;

        let info = self.ledger.supply(item.record())?;
        let slot = supply_slot(&info);
        let question = match item {
            CancelItem::Offer(_) if info.seller.id == req.sender.id => {
                text::confirm_cancel_offer(&slot)
            }
            CancelItem::Claim(_)
                if info.buyer.as_ref().map(|b| b.id) == Some(req.sender.id) =>
            {
                text::confirm_cancel_claim(&slot)
            }
            _ => {
                return Err(DbError::invalid_data(format!(
                    "user {} cannot cancel {item}",
                    req.sender.id
                )))
            }
        };
        Ok(Reply::new(question)
            .action(text::YES, extend(data, CONFIRM_MARK))
            .back(back(data, 1)))
    }

    fn cancel_execute(&self, req: &Request<'_>) -> DbResult<Reply> {
        let item = req.command.item(1)?;
        req.command.confirmed(2)?;

        let user = self.register(req.sender)?;
        let info = self.ledger.supply(item.record())?;
        let slot = supply_slot(&info);

        match item {
            CancelItem::Offer(record) => match self.ledger.cancel_sell(record, user.id) {
                Ok(()) => Ok(Reply::new(text::offer_canceled(&slot))),
                Err(err) if err.status == Status::RecordUsed => {
                    Ok(Reply::new(text::offer_has_buyer(&slot)))
                }
                Err(err) => Err(err),
            },
            CancelItem::Claim(record) => {
                self.ledger.cancel_buy(record, user.id)?;
                let admin = self.admin_of(&info.session)?;
                let mut reply = Reply::new(text::admin_told(
                    text::claim_canceled(&slot),
                    admin.as_ref(),
                ))
                .notify(
                    info.seller.id,
                    text::admin_told(text::claim_dropped(&user, &slot), admin.as_ref()),
                    Vec::new(),
                );
                if let Some(admin) = admin {
                    reply = reply.notify(admin.id, text::claim_withdrawn(&user, &slot), Vec::new());
                }
                Ok(reply)
            }
        }
    }

    // ==================== misc ====================

    fn status(&self, _req: &Request<'_>) -> DbResult<Reply> {
        Ok(Reply::new(self.status_text()))
    }

    fn about(&self, _req: &Request<'_>) -> DbResult<Reply> {
        Ok(Reply::new(self.about.as_str()))
    }

    fn restart(&self, _req: &Request<'_>) -> DbResult<Reply> {
        Ok(main_menu())
    }
}

fn main_menu() -> Reply {
    Reply::new(text::MAIN_MENU)
        .action(text::SELL, Verb::Sell.as_str())
        .action(text::BUY, Verb::Buy.as_str())
        .action(text::CANCEL, Verb::Cancel.as_str())
        .action(text::STATUS, Verb::Status.as_str())
        .action(text::ABOUT, Verb::About.as_str())
        .without_home()
}

/// Render a status board for group chats
pub fn status_listing(board: &StatusBoard) -> String {
    if board.is_empty() {
        text::EMPTY_EXCHANGE.to_string()
    } else {
        text::board(text::STATUS_TITLE, board)
    }
}

fn supply_slot(info: &SupplyInfo) -> String {
    text::slot(&info.place, &info.session, info.record.trade_in_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::*;

    const COACH: i64 = 404;

    struct FixedClock(NaiveDate);

    impl Clock for FixedClock {
        fn today(&self) -> NaiveDate {
            self.0
        }
    }

    fn sender(id: i64, nick: &str) -> Sender {
        Sender {
            id,
            nick: nick.into(),
            fullname: format!("{} {}", nick, nick.to_uppercase()),
        }
    }

    fn alice() -> Sender {
        sender(ALICE, "alice")
    }

    fn bob() -> Sender {
        sender(BOB, "bob")
    }

    fn carol() -> Sender {
        sender(CAROL, "carol")
    }

    fn dispatcher() -> Dispatcher {
        // Thursday before the first test date
        let clock = Arc::new(FixedClock(date("27.12.2029")));
        Dispatcher::new(ledger(), clock, "about text").unwrap()
    }

    fn datas(reply: &Reply) -> Vec<&str> {
        reply.actions.iter().map(|a| a.data.as_str()).collect()
    }

    fn invalid() -> &'static str {
        text::failure(Status::InvalidData)
    }

    #[test]
    fn test_table_validation() {
        assert!(validate(&arity_table()).is_ok());

        let mut gap = arity_table();
        gap.get_mut(&Verb::Sell).unwrap().remove(&3);
        assert_eq!(
            validate(&gap),
            Err(TableError::Gap {
                verb: Verb::Sell,
                arities: vec![1, 2, 4, 5]
            })
        );

        let mut missing = arity_table();
        missing.remove(&Verb::About);
        assert_eq!(validate(&missing), Err(TableError::Missing(Verb::About)));

        let mut empty = arity_table();
        empty.insert(Verb::Status, BTreeMap::new());
        let clock = Arc::new(FixedClock(date("27.12.2029")));
        let err = Dispatcher::with_table(ledger(), clock, String::new(), empty).err();
        assert_eq!(err, Some(TableError::Missing(Verb::Status)));
    }

    #[test]
    fn test_start_registers_user() {
        let dispatcher = dispatcher();
        let reply = dispatcher.start(&Sender {
            id: 555,
            nick: String::new(),
            fullname: "Dan D".into(),
        });
        assert!(!reply.home);
        assert_eq!(datas(&reply), vec!["sell", "buy", "cancel", "status", "about"]);
        assert_eq!(dispatcher.ledger.user(555).unwrap().nick, "id555");

        assert_eq!(dispatcher.dispatch(&alice(), "restart"), reply);
    }

    #[test]
    fn test_sell_walkthrough() {
        let d = dispatcher();

        let places = d.dispatch(&alice(), "sell");
        assert_eq!(datas(&places), vec!["sell,1", "sell,2"]);
        assert_eq!(places.back, None);
        assert!(places.home);

        let sessions = d.dispatch(&alice(), "sell,1");
        assert_eq!(datas(&sessions), vec!["sell,1,1", "sell,1,2"]);
        assert_eq!(sessions.actions[0].label, "Adults Tue 07:00");
        assert_eq!(sessions.back.as_deref(), Some("sell"));

        let dates = d.dispatch(&alice(), "sell,1,1");
        assert_eq!(
            datas(&dates),
            vec![
                "sell,1,1,01.01.2030",
                "sell,1,1,08.01.2030",
                "sell,1,1,15.01.2030",
                "sell,1,1,22.01.2030"
            ]
        );
        assert_eq!(dates.back.as_deref(), Some("sell"));

        let confirm = d.dispatch(&alice(), "sell,1,1,01.01.2030");
        assert_eq!(datas(&confirm), vec!["sell,1,1,01.01.2030,Y"]);
        assert_eq!(confirm.back.as_deref(), Some("sell,1,1"));
        assert!(confirm.text.contains("Adults Tue 07:00 01.01.2030 at North Pool"));

        let done = d.dispatch(&alice(), "sell,1,1,01.01.2030,Y");
        assert_eq!(done.text, text::sell_created("Adults Tue 07:00 01.01.2030 at North Pool"));
        let again = d.dispatch(&alice(), "sell,1,1,01.01.2030,Y");
        assert_eq!(again.text, text::sell_exists("Adults Tue 07:00 01.01.2030 at North Pool"));
    }

    #[test]
    fn test_sell_rejects_inconsistent_choices() {
        let d = dispatcher();
        // Session 3 belongs to the second place
        assert_eq!(d.dispatch(&alice(), "sell,1,3").text, invalid());
        // Wednesday for a Tuesday session
        assert_eq!(d.dispatch(&alice(), "sell,1,1,02.01.2030").text, invalid());
        // A Tuesday already gone
        assert_eq!(d.dispatch(&alice(), "sell,1,1,25.12.2029,Y").text, invalid());
        assert_eq!(d.dispatch(&alice(), "sell,9").text, invalid());
    }

    #[test]
    fn test_malformed_input_never_reaches_store() {
        let d = dispatcher();
        d.ledger
            .db()
            .execute_raw(
                "DROP TABLE sell_records; DROP TABLE buy_records; DROP TABLE sessions; \
                 DROP TABLE places; DROP TABLE users;",
            )
            .unwrap();

        for data in [
            "",
            "trade",
            "sell,x",
            "sell,1,abc",
            "sell,1,1,2030-01-01",
            "sell,1,1,01.01.2030,N",
            "sell,1,1,01.01.2030,Y,extra",
            "buy,-1",
            "buy,1,Y,1",
            "cancel,z9",
            "cancel,s1,maybe",
            "confirm,1",
            "confirm,1,bob",
            "reject,x,1",
            "status,1",
        ] {
            assert_eq!(d.dispatch(&alice(), data).text, invalid(), "{data:?}");
        }

        // A well-formed request does reach the (now broken) store
        assert_eq!(
            d.dispatch(&alice(), "sell,1").text,
            text::failure(Status::InternalError)
        );
    }

    #[test]
    fn test_buy_approval_round() {
        let d = dispatcher();
        d.ledger.register_user(COACH, "coach", "Coach C").unwrap();
        let record = d.ledger.add_sell(1, date("01.01.2030"), ALICE).unwrap();

        let offers = d.dispatch(&bob(), "buy");
        assert_eq!(datas(&offers), vec!["buy,1"]);
        assert!(offers.text.contains("Seller: @alice"));

        // Sellers do not see their own offers as choices
        assert!(d.dispatch(&alice(), "buy").actions.is_empty());

        let confirm = d.dispatch(&bob(), "buy,1");
        assert_eq!(datas(&confirm), vec!["buy,1,Y"]);
        assert_eq!(confirm.back.as_deref(), Some("buy"));

        let request = d.dispatch(&bob(), "buy,1,Y");
        assert_eq!(request.notifications.len(), 1);
        let ask = &request.notifications[0];
        assert_eq!(ask.user_id, ALICE);
        let decisions: Vec<_> = ask.actions.iter().map(|a| a.data.as_str()).collect();
        assert_eq!(decisions, vec!["confirm,1,202", "reject,1,202"]);
        assert!(d.ledger.sell_record(record).unwrap().is_open(), "no claim before approval");

        let done = d.dispatch(&alice(), "confirm,1,202");
        assert!(done.text.contains("@bob"));
        let told: Vec<_> = done.notifications.iter().map(|n| n.user_id).collect();
        assert_eq!(told, vec![BOB, COACH]);
        assert!(done.notifications[0].text.contains("@coach"));
        assert!(d.ledger.sell_record(record).unwrap().buy_id.is_some());

        // The slot is no longer on offer
        assert_eq!(d.dispatch(&carol(), "buy").text, text::NO_OFFERS);
        assert_eq!(
            d.dispatch(&carol(), "buy,1").text,
            text::failure(Status::RecordUsed)
        );
    }

    #[test]
    fn test_only_the_seller_decides() {
        let d = dispatcher();
        let record = d.ledger.add_sell(1, date("01.01.2030"), ALICE).unwrap();

        assert_eq!(d.dispatch(&carol(), "confirm,1,202").text, invalid());
        assert_eq!(d.dispatch(&carol(), "reject,1,202").text, invalid());
        assert!(d.ledger.sell_record(record).unwrap().is_open());
    }

    #[test]
    fn test_second_confirmation_is_dropped() {
        let d = dispatcher();
        d.ledger.add_sell(1, date("01.01.2030"), ALICE).unwrap();
        d.dispatch(&alice(), "confirm,1,202");

        let late = d.dispatch(&alice(), "confirm,1,303");
        assert_eq!(late.text, text::slot_taken(Some(&d.ledger.user(BOB).unwrap())));
        assert_eq!(late.notifications.len(), 1);
        assert_eq!(late.notifications[0].user_id, CAROL);
    }

    #[test]
    fn test_reject_notifies_buyer() {
        let d = dispatcher();
        let record = d.ledger.add_sell(1, date("01.01.2030"), ALICE).unwrap();

        let reply = d.dispatch(&alice(), "reject,1,202");
        assert!(reply.text.contains("@bob"));
        assert_eq!(reply.notifications[0].user_id, BOB);
        assert!(d.ledger.sell_record(record).unwrap().is_open());
    }

    #[test]
    fn test_cancel_claim_then_offer() {
        let d = dispatcher();
        let on = date("01.01.2030");
        let record = d.ledger.add_sell(1, on, ALICE).unwrap();
        d.ledger.add_buy(1, on, ALICE, BOB).unwrap();

        // The seller cannot withdraw a claimed offer, and it is not listed
        assert_eq!(d.dispatch(&alice(), "cancel").text, text::NOTHING_TO_CANCEL);
        let blocked = d.dispatch(&alice(), "cancel,s1,Y");
        assert!(blocked.text.contains("already has a buyer"));

        let items = d.dispatch(&bob(), "cancel");
        assert_eq!(datas(&items), vec!["cancel,b1"]);
        let confirm = d.dispatch(&bob(), "cancel,b1");
        assert_eq!(datas(&confirm), vec!["cancel,b1,Y"]);
        assert_eq!(confirm.back.as_deref(), Some("cancel"));

        let done = d.dispatch(&bob(), "cancel,b1,Y");
        assert_eq!(done.notifications.len(), 1);
        assert_eq!(done.notifications[0].user_id, ALICE);
        assert!(d.ledger.sell_record(record).unwrap().is_open());

        // Carol cannot cancel what is not hers
        assert_eq!(d.dispatch(&carol(), "cancel,s1").text, invalid());
        assert_eq!(d.dispatch(&carol(), "cancel,s1,Y").text, invalid());

        assert_eq!(datas(&d.dispatch(&alice(), "cancel")), vec!["cancel,s1"]);
        let withdrawn = d.dispatch(&alice(), "cancel,s1,Y");
        assert!(withdrawn.text.contains("was canceled"));
        assert!(d.ledger.sell_record(record).unwrap().canceled);
    }

    #[test]
    fn test_status_and_about() {
        let d = dispatcher();
        assert_eq!(d.status_text(), text::EMPTY_EXCHANGE);

        d.ledger.add_sell(1, date("01.01.2030"), ALICE).unwrap();
        let status = d.dispatch(&bob(), "status");
        assert!(status.text.starts_with(text::STATUS_TITLE));
        assert!(status.text.contains("North Pool"));
        assert!(status.text.contains("@alice"));

        assert_eq!(d.dispatch(&bob(), "about").text, "about text");
    }
}
