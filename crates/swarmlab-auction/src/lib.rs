//! Sealed-bid auction run as a contract-net exchange.
//!
//! An auctioneer calls for proposals on one good at a time, every bidder answers
//! with a bid capped by its remaining budget, and the best bid wins at either its
//! own price or the runner-up's. Once every good is sold the auctioneer asks the
//! bidders for the utility they accumulated.

use std::cmp::Ordering;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

mod message;
mod transport;

pub use message::{Envelope, Performative};
pub use transport::{LocalTransport, ThreadedTransport, Transport};

pub const AUCTIONEER: &str = "auctioneer";

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("invalid auction configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("no bidders to call for proposals")]
    NoBidders,
    #[error("unknown bidder {0}")]
    UnknownBidder(String),
    #[error("{bidder} did not reply to round {round}")]
    MissingReply { bidder: String, round: usize },
    #[error("expected {expected} from {from}, got {got}")]
    UnexpectedReply {
        from: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("bidder worker failure: {0}")]
    Worker(String),
}

/// Good with three uniformly drawn attribute weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Good {
    pub weights: [f64; 3],
}

impl Good {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            weights: [rng.random(), rng.random(), rng.random()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Strategy {
    /// Bids its true (budget-capped) valuation.
    Faithful,
    /// Bids a `discount` fraction below its valuation.
    Shaded { discount: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingRule {
    /// Winner pays its own bid.
    FirstPrice,
    /// Winner pays the second-highest bid (Vickrey).
    #[default]
    SecondPrice,
}

impl PricingRule {
    /// Price paid by the first entry of `ranked`, which must be sorted best first.
    #[must_use]
    pub fn price(self, ranked: &[(String, f64)]) -> Option<f64> {
        let top = ranked.first()?.1;
        Some(match self {
            Self::FirstPrice => top,
            Self::SecondPrice => ranked.get(1).map_or(top, |(_, bid)| *bid),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bidder {
    pub name: String,
    pub weights: [f64; 3],
    pub budget: f64,
    /// Sum of `valuation − price` over the goods won.
    pub utility: f64,
    pub strategy: Strategy,
}

impl Bidder {
    #[must_use]
    pub fn new(name: impl Into<String>, weights: [f64; 3], budget: f64, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            weights,
            budget,
            utility: 0.0,
            strategy,
        }
    }

    #[must_use]
    pub fn valuation(&self, good: &Good) -> f64 {
        self.weights
            .iter()
            .zip(good.weights)
            .map(|(own, theirs)| own * theirs)
            .sum()
    }

    #[must_use]
    pub fn bid(&self, good: &Good) -> f64 {
        let capped = self.valuation(good).min(self.budget);
        match self.strategy {
            Strategy::Faithful => capped,
            Strategy::Shaded { discount } => capped * (1.0 - discount),
        }
    }

    /// React to one envelope, returning the reply if the performative calls for one.
    pub fn handle(&mut self, envelope: &Envelope) -> Option<Envelope> {
        match &envelope.performative {
            Performative::Cfp { good } => Some(envelope.reply(Performative::Propose {
                bid: self.bid(good),
            })),
            Performative::AcceptProposal { good, price } => {
                self.budget -= price;
                self.utility += self.valuation(good) - price;
                None
            }
            Performative::RejectProposal => None,
            Performative::Request => Some(envelope.reply(Performative::Inform {
                utility: self.utility,
                budget: self.budget,
            })),
            other => {
                warn!(bidder = %self.name, performative = other.label(), "ignoring message");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuctionConfig {
    pub n_bidders: usize,
    pub n_goods: usize,
    pub budget: f64,
    /// How many of the bidders shade their bids.
    pub n_shaded: usize,
    pub discount: f64,
    pub pricing: PricingRule,
    pub rng_seed: Option<u64>,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            n_bidders: 15,
            n_goods: 150,
            budget: 10.0,
            n_shaded: 1,
            discount: 0.1,
            pricing: PricingRule::SecondPrice,
            rng_seed: None,
        }
    }
}

impl AuctionConfig {
    pub fn validate(&self) -> Result<(), AuctionError> {
        if self.n_bidders == 0 {
            return Err(AuctionError::NoBidders);
        }
        if self.n_shaded > self.n_bidders {
            return Err(AuctionError::InvalidConfig(
                "n_shaded cannot exceed n_bidders",
            ));
        }
        if !(self.budget >= 0.0) {
            return Err(AuctionError::InvalidConfig("budget must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(AuctionError::InvalidConfig("discount must lie in [0, 1]"));
        }
        Ok(())
    }

    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }

    /// Draw the bidders and the goods to sell.
    ///
    /// Faithful bidders are named `bidder_agent_<i>`; the shaded ones come last
    /// and are named `target_agent`, `target_agent_1`, ...
    pub fn market(&self) -> Result<(Vec<Bidder>, Vec<Good>), AuctionError> {
        self.validate()?;
        let mut rng = self.seeded_rng();
        let faithful = self.n_bidders - self.n_shaded;
        let bidders = (0..self.n_bidders)
            .map(|i| {
                let weights = [rng.random(), rng.random(), rng.random()];
                if i < faithful {
                    Bidder::new(format!("bidder_agent_{i}"), weights, self.budget, Strategy::Faithful)
                } else {
                    let name = match i - faithful {
                        0 => "target_agent".to_owned(),
                        k => format!("target_agent_{k}"),
                    };
                    let strategy = Strategy::Shaded {
                        discount: self.discount,
                    };
                    Bidder::new(name, weights, self.budget, strategy)
                }
            })
            .collect();
        let goods = (0..self.n_goods).map(|_| Good::random(&mut rng)).collect();
        Ok((bidders, goods))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    pub round: usize,
    pub winner: String,
    pub price: f64,
    /// Bids sorted best first.
    pub bids: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BidderReport {
    pub name: String,
    pub utility: f64,
    pub budget: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuctionOutcome {
    pub pricing: PricingRule,
    pub rounds: Vec<RoundRecord>,
    pub reports: Vec<BidderReport>,
}

impl AuctionOutcome {
    #[must_use]
    pub fn report(&self, name: &str) -> Option<&BidderReport> {
        self.reports.iter().find(|report| report.name == name)
    }

    /// Number of goods each bidder won, keyed like `reports`.
    #[must_use]
    pub fn wins(&self, name: &str) -> usize {
        self.rounds.iter().filter(|round| round.winner == name).count()
    }
}

/// Best bid first; equal bids go to the lexicographically smaller name.
fn rank(bids: &mut [(String, f64)]) {
    bids.sort_by(|(a_name, a_bid), (b_name, b_bid)| {
        match b_bid.total_cmp(a_bid) {
            Ordering::Equal => a_name.cmp(b_name),
            other => other,
        }
    });
}

pub struct Auctioneer<T> {
    transport: T,
    pricing: PricingRule,
}

impl<T: Transport> Auctioneer<T> {
    pub const fn new(transport: T, pricing: PricingRule) -> Self {
        Self { transport, pricing }
    }

    fn collect_bids(
        &mut self,
        round: usize,
        good: Good,
        participants: &[String],
    ) -> Result<Vec<(String, f64)>, AuctionError> {
        let cfps = participants
            .iter()
            .map(|name| Envelope::new(AUCTIONEER, name.as_str(), round, Performative::Cfp { good }))
            .collect();
        let replies = self.transport.broadcast(cfps)?;
        let mut bids = Vec::with_capacity(participants.len());
        for reply in replies {
            match reply.performative {
                Performative::Propose { bid } => bids.push((reply.sender, bid)),
                other => {
                    return Err(AuctionError::UnexpectedReply {
                        from: reply.sender,
                        expected: "propose",
                        got: other.label(),
                    });
                }
            }
        }
        if let Some(silent) = participants
            .iter()
            .find(|name| !bids.iter().any(|(bidder, _)| bidder == *name))
        {
            return Err(AuctionError::MissingReply {
                bidder: silent.clone(),
                round,
            });
        }
        Ok(bids)
    }

    /// Sell one good and notify every participant of the decision.
    pub fn sell(
        &mut self,
        round: usize,
        good: Good,
        participants: &[String],
    ) -> Result<RoundRecord, AuctionError> {
        let mut bids = self.collect_bids(round, good, participants)?;
        rank(&mut bids);
        let price = self.pricing.price(&bids).ok_or(AuctionError::NoBidders)?;
        let winner = bids[0].0.clone();

        let decisions = bids
            .iter()
            .map(|(name, _)| {
                let performative = if *name == winner {
                    Performative::AcceptProposal { good, price }
                } else {
                    Performative::RejectProposal
                };
                Envelope::new(AUCTIONEER, name.as_str(), round, performative)
            })
            .collect();
        self.transport.broadcast(decisions)?;
        debug!(round, winner = %winner, price, "good sold");

        Ok(RoundRecord {
            round,
            winner,
            price,
            bids,
        })
    }

    /// Ask every participant for its accumulated utility and remaining budget.
    pub fn survey(
        &mut self,
        round: usize,
        participants: &[String],
    ) -> Result<Vec<BidderReport>, AuctionError> {
        let requests = participants
            .iter()
            .map(|name| Envelope::new(AUCTIONEER, name.as_str(), round, Performative::Request))
            .collect();
        let mut reports = Vec::with_capacity(participants.len());
        for reply in self.transport.broadcast(requests)? {
            match reply.performative {
                Performative::Inform { utility, budget } => reports.push(BidderReport {
                    name: reply.sender,
                    utility,
                    budget,
                }),
                other => {
                    return Err(AuctionError::UnexpectedReply {
                        from: reply.sender,
                        expected: "inform",
                        got: other.label(),
                    });
                }
            }
        }
        Ok(reports)
    }

    pub fn run(&mut self, goods: &[Good]) -> Result<AuctionOutcome, AuctionError> {
        let participants = self.transport.participants();
        if participants.is_empty() {
            return Err(AuctionError::NoBidders);
        }
        let mut rounds = Vec::with_capacity(goods.len());
        for (round, good) in goods.iter().enumerate() {
            rounds.push(self.sell(round, *good, &participants)?);
        }
        let reports = self.survey(goods.len(), &participants)?;
        info!(
            goods = goods.len(),
            bidders = participants.len(),
            pricing = ?self.pricing,
            "auction complete"
        );
        Ok(AuctionOutcome {
            pricing: self.pricing,
            rounds,
            reports,
        })
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

/// Run the configured auction over direct calls or one thread per bidder.
pub fn run_auction(config: &AuctionConfig, threaded: bool) -> Result<AuctionOutcome, AuctionError> {
    let (bidders, goods) = config.market()?;
    if threaded {
        let mut auctioneer = Auctioneer::new(ThreadedTransport::spawn(bidders)?, config.pricing);
        let outcome = auctioneer.run(&goods)?;
        auctioneer.into_transport().into_bidders()?;
        Ok(outcome)
    } else {
        Auctioneer::new(LocalTransport::new(bidders), config.pricing).run(&goods)
    }
}
