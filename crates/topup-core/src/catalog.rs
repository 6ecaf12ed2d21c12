//! # Catalog Types
//!
//! Games, denominations and prices as served by `GET /products`.
//! A TOML fixture can be loaded for demos and tests.

use crate::error::{ShopError, ShopResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    #[serde(alias = "IDR")]
    IDR,
    #[serde(alias = "USD")]
    USD,
    #[serde(alias = "EUR")]
    EUR,
    #[serde(alias = "SGD")]
    SGD,
    #[serde(alias = "MYR")]
    MYR,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::IDR => "idr",
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::SGD => "sgd",
            Currency::MYR => "myr",
        }
    }

    /// Returns the number of decimal places for this currency
    pub fn decimal_places(&self) -> u8 {
        match self {
            Currency::IDR => 0,
            _ => 2,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a price from the smallest unit
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Multiply by a quantity. Overflow is reported rather than wrapped.
    pub fn times(&self, quantity: Quantity) -> ShopResult<Price> {
        let amount = self
            .amount
            .checked_mul(i64::from(quantity.get()))
            .ok_or_else(|| ShopError::Validation("Order total is out of range".to_string()))?;
        Ok(Price::new(amount, self.currency))
    }

    /// Format for display (e.g., "Rp 15000", "$4.99")
    pub fn display(&self) -> String {
        let symbol = match self.currency {
            Currency::IDR => "Rp ",
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::SGD => "S$",
            Currency::MYR => "RM",
        };
        if self.currency.decimal_places() == 0 {
            format!("{}{}", symbol, self.amount)
        } else {
            format!("{}{}.{:02}", symbol, self.amount / 100, (self.amount % 100).abs())
        }
    }
}

/// Quantities a customer may pick. Free-form values are not accepted.
pub const ALLOWED_QUANTITIES: [u32; 6] = [1, 2, 3, 4, 5, 10];

/// A quantity drawn from [`ALLOWED_QUANTITIES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: u32) -> ShopResult<Self> {
        if ALLOWED_QUANTITIES.contains(&value) {
            Ok(Self(value))
        } else {
            Err(ShopError::Validation(format!(
                "Quantity must be one of {:?}",
                ALLOWED_QUANTITIES
            )))
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Every allowed quantity, in ascending order
    pub fn all() -> impl Iterator<Item = Quantity> {
        ALLOWED_QUANTITIES.iter().map(|q| Quantity(*q))
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Quantity::ONE
    }
}

impl TryFrom<u32> for Quantity {
    type Error = ShopError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Quantity::new(value)
    }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

/// A game whose points can be topped up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    /// Platform label (e.g. "mobile", "pc")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default = "default_true", alias = "is_active")]
    pub active: bool,
}

/// A purchasable unit of in-game currency, tied to one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Denomination {
    pub id: String,
    #[serde(alias = "gameId")]
    pub game_id: String,
    pub name: String,
    /// Points delivered per unit
    #[serde(default)]
    pub amount: u64,
    /// Price per unit in smallest currency unit
    pub price: i64,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default = "default_true", alias = "is_active")]
    pub active: bool,
}

impl Denomination {
    pub fn unit_price(&self) -> Price {
        Price::new(self.price, self.currency)
    }
}

fn default_true() -> bool {
    true
}

/// Catalog snapshot (games plus their denominations)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub games: Vec<Game>,
    #[serde(default)]
    pub denominations: Vec<Denomination>,
}

impl Catalog {
    pub fn new(games: Vec<Game>, denominations: Vec<Denomination>) -> Self {
        Self {
            games,
            denominations,
        }
    }

    /// Find a game by ID
    pub fn game(&self, id: &str) -> Option<&Game> {
        self.games.iter().find(|g| g.id == id)
    }

    /// Find a denomination by ID
    pub fn denomination(&self, id: &str) -> Option<&Denomination> {
        self.denominations.iter().find(|d| d.id == id)
    }

    /// Get all active games
    pub fn active_games(&self) -> impl Iterator<Item = &Game> {
        self.games.iter().filter(|g| g.active)
    }

    /// Active denominations of one game
    pub fn denominations_for<'a>(&'a self, game_id: &'a str) -> impl Iterator<Item = &'a Denomination> {
        self.denominations
            .iter()
            .filter(move |d| d.active && d.game_id == game_id)
    }

    /// Resolve a (game, denomination) pair, checking that the denomination
    /// belongs to the game and both are purchasable.
    pub fn resolve(&self, game_id: &str, denomination_id: &str) -> ShopResult<(&Game, &Denomination)> {
        let game = self
            .game(game_id)
            .filter(|g| g.active)
            .ok_or_else(|| ShopError::Validation(format!("Game is not available: {}", game_id)))?;
        let denomination = self
            .denomination(denomination_id)
            .filter(|d| d.active)
            .ok_or_else(|| {
                ShopError::Validation(format!("Denomination is not available: {}", denomination_id))
            })?;
        if denomination.game_id != game.id {
            return Err(ShopError::Validation(format!(
                "Denomination {} does not belong to {}",
                denomination.id, game.name
            )));
        }
        Ok((game, denomination))
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

/// Source of the storefront catalog (`GET /products`)
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self) -> ShopResult<Catalog>;
}
