//! Resolving statement rows to members
//!
//! Three rules in priority order: IBAN equality, member-number token in the
//! reference or purpose text, fuzzy name comparison. The first rule that
//! yields exactly one candidate wins. Whenever two or more members qualify at
//! the same stage the row is reported ambiguous and left for manual
//! resolution — a wrong automatic match silently corrupts another member's
//! claim history, which is worse than requiring review.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{MemberId, MemberProfile, ValidRow};
use crate::utils::validation::normalize_iban;

/// Tuning knobs for the matcher.
///
/// The name thresholds are deliberately configurable; the right values depend
/// on how noisy the association's statement counterparty names are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum token-set similarity for a name match
    pub name_threshold: f64,
    /// The runner-up must score below `name_threshold - name_margin` for the
    /// best name candidate to win outright
    pub name_margin: f64,
    /// Shortest token considered a member-number candidate
    pub min_number_len: usize,
    /// Longest token considered a member-number candidate
    pub max_number_len: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            name_threshold: 0.8,
            name_margin: 0.1,
            min_number_len: 3,
            max_number_len: 16,
        }
    }
}

/// Which rule resolved the row, and how confidently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Counterparty IBAN is registered for the member
    Iban,
    /// Reference or purpose text contains the member's number
    MemberNumber,
    /// Normalized name similarity cleared the threshold with a clear margin
    Name { score: f64 },
}

/// Result of matching one row against the member directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchResult {
    Matched {
        member_id: MemberId,
        confidence: MatchConfidence,
    },
    Ambiguous {
        candidates: Vec<MemberId>,
    },
    Unmatched,
}

/// Matches statement rows to members.
///
/// Built once per batch from the member directory; matching itself is pure
/// in-memory lookup, so the row loop never touches the directory again.
pub struct MemberMatcher {
    config: MatcherConfig,
    by_iban: HashMap<String, Vec<MemberId>>,
    by_number: HashMap<String, Vec<MemberId>>,
    names: Vec<(MemberId, BTreeSet<String>)>,
    association_ibans: HashSet<String>,
}

impl MemberMatcher {
    /// Build the matching index from active members, their registered IBANs,
    /// and the association's own account IBANs
    pub fn build(
        members: &[MemberProfile],
        member_ibans: &HashMap<MemberId, Vec<String>>,
        association_ibans: &[String],
        config: MatcherConfig,
    ) -> Self {
        let mut by_iban: HashMap<String, Vec<MemberId>> = HashMap::new();
        let mut by_number: HashMap<String, Vec<MemberId>> = HashMap::new();
        let mut names = Vec::with_capacity(members.len());

        for member in members.iter().filter(|m| m.active) {
            if let Some(ibans) = member_ibans.get(&member.id) {
                for iban in ibans {
                    by_iban
                        .entry(normalize_iban(iban))
                        .or_default()
                        .push(member.id);
                }
            }
            if let Some(number) = &member.member_number {
                let number = number.trim().to_uppercase();
                if !number.is_empty() {
                    by_number.entry(number).or_default().push(member.id);
                }
            }
            names.push((member.id, name_tokens(&member.display_name())));
        }

        Self {
            config,
            by_iban,
            by_number,
            names,
            association_ibans: association_ibans
                .iter()
                .map(|iban| normalize_iban(iban))
                .collect(),
        }
    }

    /// Resolve a row to zero, one, or several member candidates
    pub fn match_row(&self, row: &ValidRow) -> MatchResult {
        if let Some(iban) = &row.iban {
            let iban = normalize_iban(iban);
            // Internal transfer between the association's own accounts;
            // name or reference text must not resolve it to a member.
            if self.association_ibans.contains(&iban) {
                debug!(row_index = row.row_index, "row is an own-account transfer");
                return MatchResult::Unmatched;
            }
            match self.match_iban(&iban) {
                MatchResult::Unmatched => {}
                result => return result,
            }
        }

        match self.match_reference(row) {
            MatchResult::Unmatched => {}
            result => return result,
        }

        match &row.counterparty {
            Some(counterparty) => self.match_name(counterparty),
            None => MatchResult::Unmatched,
        }
    }

    fn match_iban(&self, iban: &str) -> MatchResult {
        match self.by_iban.get(iban).map(Vec::as_slice) {
            Some([member_id]) => MatchResult::Matched {
                member_id: *member_id,
                confidence: MatchConfidence::Iban,
            },
            Some(candidates) if candidates.len() > 1 => MatchResult::Ambiguous {
                candidates: candidates.to_vec(),
            },
            _ => MatchResult::Unmatched,
        }
    }

    /// Scan reference and purpose text for tokens shaped like member numbers.
    ///
    /// Tokens split on whitespace and list separators, keeping inner hyphens,
    /// so number formats like `M-1042` survive intact.
    fn match_reference(&self, row: &ValidRow) -> MatchResult {
        let mut candidates: Vec<MemberId> = Vec::new();
        let texts = [row.reference.as_deref(), row.purpose.as_deref()];

        for text in texts.iter().flatten() {
            let tokens = text
                .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '/' | ':' | '(' | ')'))
                .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()));
            for token in tokens {
                if !self.looks_like_member_number(token) {
                    continue;
                }
                if let Some(members) = self.by_number.get(&token.to_uppercase()) {
                    for member_id in members {
                        if !candidates.contains(member_id) {
                            candidates.push(*member_id);
                        }
                    }
                }
            }
        }

        match candidates.as_slice() {
            [] => MatchResult::Unmatched,
            [member_id] => MatchResult::Matched {
                member_id: *member_id,
                confidence: MatchConfidence::MemberNumber,
            },
            _ => MatchResult::Ambiguous { candidates },
        }
    }

    fn looks_like_member_number(&self, token: &str) -> bool {
        token.len() >= self.config.min_number_len
            && token.len() <= self.config.max_number_len
            && token.chars().any(|c| c.is_ascii_digit())
    }

    /// Token-set similarity between the counterparty name and each member
    fn match_name(&self, counterparty: &str) -> MatchResult {
        let row_tokens = name_tokens(counterparty);
        if row_tokens.is_empty() {
            return MatchResult::Unmatched;
        }

        let mut scored: Vec<(MemberId, f64)> = self
            .names
            .iter()
            .map(|(member_id, tokens)| (*member_id, token_set_score(&row_tokens, tokens)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let Some(&(best_id, best_score)) = scored.first() else {
            return MatchResult::Unmatched;
        };
        if best_score < self.config.name_threshold {
            return MatchResult::Unmatched;
        }

        let contested = self.config.name_threshold - self.config.name_margin;
        let candidates: Vec<MemberId> = scored
            .iter()
            .take_while(|(_, score)| *score >= contested)
            .map(|(member_id, _)| *member_id)
            .collect();

        if candidates.len() == 1 {
            debug!(member_id = %best_id, score = best_score, "name match");
            MatchResult::Matched {
                member_id: best_id,
                confidence: MatchConfidence::Name { score: best_score },
            }
        } else {
            MatchResult::Ambiguous { candidates }
        }
    }
}

/// Normalize a name into its comparable token set: case fold, German
/// umlaut/eszett expansion, diacritic fold, punctuation stripped, whitespace
/// collapsed.
pub fn name_tokens(name: &str) -> BTreeSet<String> {
    let mut folded = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        match c {
            'ä' => folded.push_str("ae"),
            'ö' => folded.push_str("oe"),
            'ü' => folded.push_str("ue"),
            'ß' => folded.push_str("ss"),
            'à' | 'á' | 'â' | 'ã' | 'å' => folded.push('a'),
            'è' | 'é' | 'ê' | 'ë' => folded.push('e'),
            'ì' | 'í' | 'î' | 'ï' | 'ı' => folded.push('i'),
            'ò' | 'ó' | 'ô' | 'õ' => folded.push('o'),
            'ù' | 'ú' | 'û' => folded.push('u'),
            'ç' => folded.push('c'),
            'ğ' => folded.push('g'),
            'ş' => folded.push('s'),
            'ñ' => folded.push('n'),
            c if c.is_alphanumeric() => folded.push(c),
            _ => folded.push(' '),
        }
    }
    folded
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two token sets
fn token_set_score(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
