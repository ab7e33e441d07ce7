//! User-facing strings

use super::format_date;
use crate::board::StatusBoard;
use crate::db::{Place, Session, Status, User};
use chrono::NaiveDate;
use std::fmt::Write as _;

pub const MAIN_MENU: &str = "What would you like to do?";
pub const SELL: &str = "Sell";
pub const BUY: &str = "Buy";
pub const CANCEL: &str = "Cancel";
pub const STATUS: &str = "Status";
pub const ABOUT: &str = "About";
pub const YES: &str = "Yes";
pub const ALLOW: &str = "Allow";
pub const DECLINE: &str = "Decline";

pub const CHOOSE_PLACE: &str = "Choose a place";
pub const CHOOSE_SESSION: &str = "Choose a time";
pub const CHOOSE_DATE: &str = "Choose a date";
pub const CHOOSE_OFFER: &str = "Choose an offer:";
pub const CHOOSE_CANCEL: &str = "What would you like to cancel?";
pub const NO_OFFERS: &str = "No offers found";
pub const NOTHING_TO_CANCEL: &str = "You have no offers or claims to cancel";
pub const EMPTY_EXCHANGE: &str = "There are no offers on the exchange";
pub const STATUS_TITLE: &str = "Status:";

pub fn failure(status: Status) -> &'static str {
    match status {
        Status::Ok => "Done",
        Status::InvalidData => "The request is malformed or out of date. Please start over",
        Status::RecordExists => "Such a record already exists",
        Status::RecordUsed => "This slot has already been taken",
        Status::InternalError => "An unexpected error occurred. Please try again later",
    }
}

/// "@nick (Full Name)"
pub fn person(user: &User) -> String {
    format!("@{} ({})", user.nick, user.fullname)
}

/// "Adults Tue 07:00 01.01.2030 at North Pool"
pub fn slot(place: &Place, session: &Session, date: NaiveDate) -> String {
    format!("{} {} at {}", session.title(), format_date(date), place.name)
}

pub fn confirm_sell(slot: &str) -> String {
    format!("Are you sure you want to offer the slot {slot}?")
}

pub fn sell_created(slot: &str) -> String {
    format!("Your offer for the slot {slot} was created")
}

pub fn sell_exists(slot: &str) -> String {
    format!("You already offer the slot {slot}")
}

pub fn confirm_buy(slot: &str, seller: &User) -> String {
    format!("Are you sure you want to take the slot {slot} from {}?", person(seller))
}

pub fn buy_request(buyer: &User, slot: &str) -> String {
    format!(
        "{} would like to take over your slot {slot}. Agree on the details with them.\n\n\
         Make sure you have been paid before allowing it.",
        person(buyer)
    )
}

pub fn buy_request_sent(seller: &User, slot: &str) -> String {
    format!(
        "A request for the slot {slot} was sent to {}. Agree on the details with them.",
        person(seller)
    )
}

pub fn buy_done(slot: &str, buyer: &User) -> String {
    format!("The slot {slot} is now held by {}", person(buyer))
}

pub fn buy_confirmed(slot: &str, seller: &User) -> String {
    format!("{} confirmed your claim on the slot {slot}", person(seller))
}

pub fn buyer_busy(buyer: &User) -> String {
    format!(
        "{} already holds another offer for this slot. The request was dropped",
        person(buyer)
    )
}

pub fn slot_taken(holder: Option<&User>) -> String {
    let who = holder.map_or_else(|| "Somebody".to_string(), person);
    format!("{who} already holds your slot. The request was dropped")
}

pub fn offer_gone(slot: &str) -> String {
    format!("The offer for the slot {slot} no longer exists. The request was dropped")
}

pub fn admin_swap(slot: &str, seller: &User, buyer: &User) -> String {
    format!("{slot}: {} comes instead of {}", person(buyer), person(seller))
}

pub fn request_declined(slot: &str, buyer: &User) -> String {
    format!("The request for the slot {slot} from {} was declined", person(buyer))
}

pub fn claim_declined(slot: &str, seller: &User) -> String {
    format!("{} declined your claim on the slot {slot}", person(seller))
}

pub fn confirm_cancel_offer(slot: &str) -> String {
    format!("Are you sure you want to cancel your offer for the slot {slot}?")
}

pub fn confirm_cancel_claim(slot: &str) -> String {
    format!("Are you sure you want to cancel your claim on the slot {slot}?")
}

pub fn offer_canceled(slot: &str) -> String {
    format!("Your offer for the slot {slot} was canceled")
}

pub fn offer_has_buyer(slot: &str) -> String {
    format!("Your offer for the slot {slot} already has a buyer and cannot be canceled")
}

pub fn claim_canceled(slot: &str) -> String {
    format!("Your claim on the slot {slot} was canceled")
}

pub fn claim_dropped(buyer: &User, slot: &str) -> String {
    format!("{} canceled the claim on your slot {slot}", person(buyer))
}

pub fn claim_withdrawn(buyer: &User, slot: &str) -> String {
    format!("{} canceled their claim on the slot {slot}", person(buyer))
}

pub fn admin_told(text: String, admin: Option<&User>) -> String {
    match admin {
        Some(admin) => format!("{text}. The coordinator {} was told", person(admin)),
        None => text,
    }
}

pub fn offer_button(place: &Place, session: &Session, date: NaiveDate, seller: &User) -> String {
    format!("{} {} {} @{}", place.name, session.time, format_date(date), seller.nick)
}

pub fn cancel_button(claim: bool, place: &Place, session: &Session, date: NaiveDate) -> String {
    let kind = if claim { "Claim" } else { "Offer" };
    format!("{kind} {} {} {}", place.name, session.time, format_date(date))
}

/// Indented listing of a board under `title`
pub fn board(title: &str, board: &StatusBoard) -> String {
    let mut text = title.to_string();
    for place in &board.places {
        let _ = write!(text, "\n\n{}:", place.place.name);
        for session in &place.sessions {
            let _ = write!(text, "\n   {}:", session.session.title());
            for date in &session.dates {
                let _ = write!(text, "\n      {}:", format_date(date.date));
                for supply in &date.supplies {
                    let _ = write!(text, "\n         Seller: {}", person(&supply.seller));
                    if let Some(buyer) = &supply.buyer {
                        let _ = write!(text, "  Buyer: {}", person(buyer));
                    }
                }
            }
        }
    }
    text
}
