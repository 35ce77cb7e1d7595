use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Competition
// ---------------------------------------------------------------------------

/// A betting context with its own odds cache row and settlement schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Competition {
    LaLiga,
    CopaRey,
    Selecciones,
}

impl Competition {
    pub const ALL: [Competition; 3] =
        [Competition::LaLiga, Competition::CopaRey, Competition::Selecciones];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "laliga" | "football" => Some(Competition::LaLiga),
            "coparey" => Some(Competition::CopaRey),
            "selecciones" => Some(Competition::Selecciones),
            _ => None,
        }
    }
}

impl std::fmt::Display for Competition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Competition::LaLiga => "laliga",
            Competition::CopaRey => "coparey",
            Competition::Selecciones => "selecciones",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Match outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Home,
    Away,
    Draw,
}

impl MatchOutcome {
    /// Derives the 1X2 outcome from a final score.
    pub fn from_goals(home: i64, away: i64) -> Self {
        if home > away {
            MatchOutcome::Home
        } else if home < away {
            MatchOutcome::Away
        } else {
            MatchOutcome::Draw
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "home" => Some(MatchOutcome::Home),
            "away" => Some(MatchOutcome::Away),
            "draw" => Some(MatchOutcome::Draw),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchOutcome::Home => "home",
            MatchOutcome::Away => "away",
            MatchOutcome::Draw => "draw",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Selection code
// ---------------------------------------------------------------------------

/// Structured selection, decoded once at bet placement.
///
/// The legacy client stored free-text labels and the settlement path matched
/// them by substring, which silently mishandled combination markets like
/// "Home/Over 1.5". Decoding up front means settlement only ever sees codes it
/// knows how to grade; labels that don't decode are rejected at placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCode {
    pub market: MarketKind,
    pub outcome: MatchOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    MatchWinner,
}

impl SelectionCode {
    /// Decode a (market, label) pair from the placement request.
    ///
    /// Accepts the labels the odds payload actually carries for the Match
    /// Winner market: "Home"/"Away"/"Draw" and the bookmaker shorthand
    /// "1"/"X"/"2". Anything containing a slash or an over/under term is a
    /// combination market and is refused.
    pub fn decode(market: &str, label: &str) -> Option<Self> {
        let market_lc = market.trim().to_lowercase();
        if market_lc != "match winner" && market_lc != "1x2" {
            return None;
        }

        let label_lc = label.trim().to_lowercase();
        if label_lc.contains('/') || label_lc.contains("over") || label_lc.contains("under") {
            return None;
        }

        let outcome = match label_lc.as_str() {
            "home" | "1" => MatchOutcome::Home,
            "away" | "2" => MatchOutcome::Away,
            "draw" | "x" => MatchOutcome::Draw,
            _ => return None,
        };

        Some(SelectionCode { market: MarketKind::MatchWinner, outcome })
    }

    /// Canonical storage form, e.g. "1x2:home".
    pub fn encode(&self) -> String {
        format!("1x2:{}", self.outcome)
    }

    /// Parse the canonical storage form written by `encode`.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("1x2:")?;
        MatchOutcome::parse(rest)
            .map(|outcome| SelectionCode { market: MarketKind::MatchWinner, outcome })
    }

    pub fn wins_against(&self, outcome: MatchOutcome) -> bool {
        self.outcome == outcome
    }
}

// ---------------------------------------------------------------------------
// Bet status / type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Cancelled,
}

impl std::fmt::Display for BetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetType {
    Single,
    Combo,
}

impl std::fmt::Display for BetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BetType::Single => write!(f, "single"),
            BetType::Combo => write!(f, "combo"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bet placement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceSelection {
    pub fixture_id: i64,
    pub market: String,
    pub selection: String,
    pub odds: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBetRequest {
    pub stake: f64,
    pub selections: Vec<PlaceSelection>,
    pub week: i64,
}

/// A selection that passed validation, with its decoded code.
#[derive(Debug, Clone)]
pub struct ValidatedSelection {
    pub fixture_id: i64,
    pub market: String,
    pub selection: String,
    pub code: SelectionCode,
    pub odds: f64,
}

#[derive(Debug, Clone)]
pub struct ValidatedBet {
    pub stake: f64,
    pub odds: f64,
    pub bet_type: BetType,
    pub week: i64,
    pub selections: Vec<ValidatedSelection>,
}

/// Validate a placement request against the configured limits.
///
/// Enforced here, before anything touches the bet store: positive stake at or
/// above the minimum, selection count within the combo cap, no two selections
/// on the same fixture, and every selection decodable to a structured code.
pub fn validate_bet(
    req: &PlaceBetRequest,
    min_stake: f64,
    max_selections: usize,
) -> Result<ValidatedBet, String> {
    if !(req.stake > 0.0) {
        return Err("stake must be positive".to_string());
    }
    if req.stake < min_stake {
        return Err(format!("stake below minimum of {min_stake}"));
    }
    if req.selections.is_empty() {
        return Err("bet must contain at least one selection".to_string());
    }
    if req.selections.len() > max_selections {
        return Err(format!("at most {max_selections} selections per combo bet"));
    }

    let mut seen = std::collections::HashSet::new();
    let mut validated = Vec::with_capacity(req.selections.len());
    let mut odds = 1.0f64;

    for sel in &req.selections {
        if !seen.insert(sel.fixture_id) {
            return Err(format!(
                "duplicate selection for fixture {} in one bet",
                sel.fixture_id
            ));
        }
        if !(sel.odds >= 1.0) {
            return Err(format!("invalid odds {} for fixture {}", sel.odds, sel.fixture_id));
        }
        let code = SelectionCode::decode(&sel.market, &sel.selection).ok_or_else(|| {
            format!(
                "unsupported selection \"{}\" on market \"{}\"",
                sel.selection, sel.market
            )
        })?;
        odds *= sel.odds;
        validated.push(ValidatedSelection {
            fixture_id: sel.fixture_id,
            market: sel.market.clone(),
            selection: sel.selection.clone(),
            code,
            odds: sel.odds,
        });
    }

    let bet_type = if validated.len() == 1 { BetType::Single } else { BetType::Combo };

    Ok(ValidatedBet {
        stake: req.stake,
        odds: round2(odds),
        bet_type,
        week: req.week,
        selections: validated,
    })
}

/// Round to two decimals — payouts and aggregate odds are point values.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
