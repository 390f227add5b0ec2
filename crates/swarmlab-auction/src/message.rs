use serde::{Deserialize, Serialize};

use crate::Good;

/// Speech act carried by an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "performative", rename_all = "snake_case")]
pub enum Performative {
    /// Call for proposals on one good.
    Cfp { good: Good },
    Propose { bid: f64 },
    AcceptProposal { good: Good, price: f64 },
    RejectProposal,
    /// Ask a bidder for its accumulated utility.
    Request,
    Inform { utility: f64, budget: f64 },
}

impl Performative {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Cfp { .. } => "cfp",
            Self::Propose { .. } => "propose",
            Self::AcceptProposal { .. } => "accept_proposal",
            Self::RejectProposal => "reject_proposal",
            Self::Request => "request",
            Self::Inform { .. } => "inform",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub receiver: String,
    /// Good index the exchange belongs to; utility requests use the good count.
    pub round: usize,
    #[serde(flatten)]
    pub performative: Performative,
}

impl Envelope {
    #[must_use]
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        round: usize,
        performative: Performative,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            round,
            performative,
        }
    }

    /// Reply addressed back to the sender of `self`.
    #[must_use]
    pub fn reply(&self, performative: Performative) -> Self {
        Self::new(
            self.receiver.clone(),
            self.sender.clone(),
            self.round,
            performative,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_flat_performative_tag() {
        let envelope = Envelope::new("auctioneer", "bidder_agent_0", 3, Performative::Propose {
            bid: 1.5,
        });
        let value = serde_json::to_value(&envelope).expect("json");
        assert_eq!(value["performative"], "propose");
        assert_eq!(value["bid"], 1.5);
        assert_eq!(value["round"], 3);
        let back: Envelope = serde_json::from_value(value).expect("parse");
        assert_eq!(back, envelope);
    }

    #[test]
    fn reply_swaps_parties() {
        let cfp = Envelope::new("auctioneer", "target_agent", 0, Performative::Request);
        let reply = cfp.reply(Performative::Inform {
            utility: 0.0,
            budget: 10.0,
        });
        assert_eq!(reply.sender, "target_agent");
        assert_eq!(reply.receiver, "auctioneer");
        assert_eq!(reply.performative.label(), "inform");
    }
}
