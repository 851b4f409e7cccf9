//! Item type classification and grade-tier categorisation of mobs.
//!
//! Both rule sets are plain data passed in by the caller (see [`crate::config`]).
//! Item types are decided by the item code prefix first, then by keywords in
//! the display name, then by the fallback.

use crate::models::DropItem;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRule {
    pub prefix: String,
    pub item_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    /// Lowercase words matched anywhere in the item name.
    pub keywords: Vec<String>,
    pub item_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    /// Item codes with these prefixes are not special drops at all.
    pub skip_prefixes: Vec<String>,
    pub prefix_rules: Vec<PrefixRule>,
    pub keyword_rules: Vec<KeywordRule>,
    pub fallback: String,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        let prefix = |prefix: &str, item_type: &str| PrefixRule {
            prefix: prefix.to_string(),
            item_type: item_type.to_string(),
        };
        let keywords = |words: &[&str], item_type: &str| KeywordRule {
            keywords: words.iter().map(|w| w.to_string()).collect(),
            item_type: item_type.to_string(),
        };

        Self {
            skip_prefixes: vec![
                "Resource_".to_string(),
                "Consumable_Recipe_".to_string(),
                "Certificate_".to_string(),
            ],
            prefix_rules: vec![
                prefix("Gear_Weapon_", "Weapon"),
                prefix("Gear_Accessory_", "Accessory"),
                prefix("Gear_Armor_", "Armor"),
                prefix("Bag_", "Bag"),
                prefix("Artisan_", "Artisan"),
                prefix("Tool_", "Tool"),
            ],
            keyword_rules: vec![
                keywords(&["bag", "satchel", "pouch"], "Bag"),
                keywords(&["apron", "clothing", "outfit"], "Artisan"),
                keywords(&["tool", "hammer", "pick"], "Tool"),
            ],
            fallback: "Special".to_string(),
        }
    }
}

/// The item code is the last path segment of an item URL
/// (`.../db/item/Gear_Weapon_Sword_1H_Zammer`).
pub fn item_code(url: &str) -> Option<&str> {
    let code = url.trim_end_matches('/').rsplit('/').next()?;
    if code.is_empty() || code.contains(':') {
        None
    } else {
        Some(code)
    }
}

impl ClassificationRules {
    pub fn is_skipped(&self, code: &str) -> bool {
        self.skip_prefixes.iter().any(|p| code.starts_with(p.as_str()))
    }

    pub fn classify(&self, code: Option<&str>, name: &str) -> String {
        if let Some(code) = code {
            if let Some(rule) = self.prefix_rules.iter().find(|r| code.starts_with(r.prefix.as_str())) {
                return rule.item_type.clone();
            }
        }

        let lower = name.to_lowercase();
        self.keyword_rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| lower.contains(k.as_str())))
            .map(|r| r.item_type.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeTier {
    /// Lowest rarity rank (1-based position in `rarity_order`) for this tier.
    pub min_rank: usize,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeRules {
    /// Rarities from lowest to highest.
    pub rarity_order: Vec<String>,
    pub tiers: Vec<GradeTier>,
    /// Category for mobs without any ranked drop.
    pub no_drop_category: String,
}

impl Default for GradeRules {
    fn default() -> Self {
        let tier = |min_rank, category: &str| GradeTier {
            min_rank,
            category: category.to_string(),
        };
        Self {
            rarity_order: ["Common", "Uncommon", "Rare", "Epic", "Legendary"]
                .iter()
                .map(|r| r.to_string())
                .collect(),
            tiers: vec![tier(1, "initiate"), tier(2, "adept"), tier(3, "radiant")],
            no_drop_category: "noSpecialDrop".to_string(),
        }
    }
}

impl GradeRules {
    /// 1-based rank of a rarity, 0 when unknown or missing.
    pub fn rank(&self, rarity: Option<&str>) -> usize {
        rarity
            .and_then(|r| {
                self.rarity_order
                    .iter()
                    .position(|known| known.eq_ignore_ascii_case(r.trim()))
            })
            .map(|idx| idx + 1)
            .unwrap_or(0)
    }

    /// Category for a mob given its drops, from the highest ranked drop.
    pub fn category_for(&self, items: &[DropItem]) -> String {
        let max_rank = items
            .iter()
            .map(|item| self.rank(item.rarity.as_deref()))
            .max()
            .unwrap_or(0);

        if max_rank == 0 {
            return self.no_drop_category.clone();
        }

        self.tiers
            .iter()
            .filter(|t| t.min_rank <= max_rank)
            .max_by_key(|t| t.min_rank)
            .map(|t| t.category.clone())
            .unwrap_or_else(|| self.no_drop_category.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_with(rarity: Option<&str>) -> DropItem {
        DropItem {
            name: "Thing".to_string(),
            url: None,
            rarity: rarity.map(str::to_string),
            item_type: None,
            drop_order: 1,
            drop_chance: None,
        }
    }

    #[test]
    fn test_code_prefix_wins_over_name() {
        let rules = ClassificationRules::default();
        // A ring by name, but the code says weapon: the code decides.
        assert_eq!(rules.classify(Some("Gear_Weapon_Ring_Blade"), "Ring Blade"), "Weapon");
        assert_eq!(rules.classify(Some("Gear_Accessory_Ring_Zammer"), "Forgelord Signet"), "Accessory");
    }

    #[test]
    fn test_name_keywords_then_fallback() {
        let rules = ClassificationRules::default();
        assert_eq!(rules.classify(Some("Misc_123"), "Crier's Satchel"), "Bag");
        assert_eq!(rules.classify(None, "Smithing Hammer"), "Tool");
        assert_eq!(rules.classify(None, "Forgelord Signet"), "Special");
    }

    #[test]
    fn test_skip_prefixes() {
        let rules = ClassificationRules::default();
        assert!(rules.is_skipped("Resource_Copper_Ore"));
        assert!(rules.is_skipped("Consumable_Recipe_Stew"));
        assert!(!rules.is_skipped("Gear_Armor_Chest_Jannus"));
    }

    #[test]
    fn test_item_code_from_url() {
        assert_eq!(
            item_code("https://ashescodex.com/db/item/Gear_Weapon_Sword_1H_Zammer"),
            Some("Gear_Weapon_Sword_1H_Zammer")
        );
        assert_eq!(item_code("https://ashescodex.com/db/item/cinderbound-greatsword/"), Some("cinderbound-greatsword"));
        assert_eq!(item_code(""), None);
    }

    #[test]
    fn test_category_from_highest_rarity() {
        let rules = GradeRules::default();
        assert_eq!(rules.category_for(&[]), "noSpecialDrop");
        assert_eq!(rules.category_for(&[drop_with(Some("common"))]), "initiate");
        assert_eq!(rules.category_for(&[drop_with(Some("Common")), drop_with(Some("Uncommon"))]), "adept");
        assert_eq!(rules.category_for(&[drop_with(Some("Epic")), drop_with(None)]), "radiant");
        assert_eq!(rules.category_for(&[drop_with(Some("Mythic"))]), "noSpecialDrop");
    }
}
