//! Domain model and wire types for the marketplace endpoints.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

pub const CRATE_NAME: &str = "sfd-core";

/// Marketplace user identifier, as reported by the item detail endpoint.
pub type UserId = u64;

/// Opaque identifier of a sold listing.
///
/// The payments endpoint reports it as either a JSON integer or a string;
/// it is never interpreted, only rendered verbatim back into URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawItemId {
            Number(i64),
            Text(String),
        }

        Ok(match RawItemId::deserialize(deserializer)? {
            RawItemId::Number(n) => ItemId(n.to_string()),
            RawItemId::Text(s) => ItemId(s),
        })
    }
}

/// One row of the sold-items payments mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct Payment {
    #[serde(default)]
    pub operation_date: i64,
    #[serde(default)]
    pub item_id: Option<ItemId>,
}

/// A page of the `user/payments` endpoint.
///
/// Entry order mirrors the JSON object order; the pager relies on it because
/// sales arrive newest-first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentsPage {
    #[serde(default)]
    pub payments: IndexMap<String, Payment>,
}

impl PaymentsPage {
    pub fn is_empty(&self) -> bool {
        self.payments.is_empty()
    }

    /// Sales in the order the endpoint returned them.
    pub fn sales(&self) -> impl Iterator<Item = &Payment> {
        self.payments.values()
    }
}

/// Envelope of the item detail endpoint. Every level is optional; a missing
/// link anywhere in the chain means the buyer is unknown.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemDetail {
    #[serde(default)]
    pub item: Option<Item>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub buyer: Option<Buyer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Buyer {
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl ItemDetail {
    /// `item.buyer.user_id`, if the whole chain is present.
    pub fn buyer_user_id(&self) -> Option<UserId> {
        self.item.as_ref()?.buyer.as_ref()?.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_accepts_integers_and_strings() {
        let from_int: ItemId = serde_json::from_str("4817713").expect("int id");
        let from_str: ItemId = serde_json::from_str("\"4817713\"").expect("str id");
        assert_eq!(from_int, from_str);
        assert_eq!(from_int.to_string(), "4817713");
    }

    #[test]
    fn payments_page_preserves_document_order() {
        // Keys deliberately out of lexicographic order.
        let page: PaymentsPage = serde_json::from_str(
            r#"{"payments":{
                "900":{"operation_date":300,"item_id":"C"},
                "005":{"operation_date":200,"item_id":"B"},
                "100":{"operation_date":100,"item_id":"A"}
            }}"#,
        )
        .expect("page");

        let dates: Vec<i64> = page.sales().map(|s| s.operation_date).collect();
        assert_eq!(dates, vec![300, 200, 100]);
    }

    #[test]
    fn missing_payments_key_is_an_empty_page() {
        let page: PaymentsPage = serde_json::from_str("{}").expect("page");
        assert!(page.is_empty());
    }

    #[test]
    fn payment_defaults_cover_absent_fields() {
        let page: PaymentsPage =
            serde_json::from_str(r#"{"payments":{"1":{}}}"#).expect("page");
        let sale = page.sales().next().expect("one sale");
        assert_eq!(sale.operation_date, 0);
        assert!(sale.item_id.is_none());
    }

    #[test]
    fn buyer_user_id_requires_the_full_chain() {
        let full: ItemDetail =
            serde_json::from_str(r#"{"item":{"buyer":{"user_id":103}}}"#).expect("detail");
        assert_eq!(full.buyer_user_id(), Some(103));

        let no_user: ItemDetail =
            serde_json::from_str(r#"{"item":{"buyer":{}}}"#).expect("detail");
        assert_eq!(no_user.buyer_user_id(), None);

        let no_buyer: ItemDetail = serde_json::from_str(r#"{"item":{}}"#).expect("detail");
        assert_eq!(no_buyer.buyer_user_id(), None);

        let empty: ItemDetail = serde_json::from_str("{}").expect("detail");
        assert_eq!(empty.buyer_user_id(), None);
    }
}
