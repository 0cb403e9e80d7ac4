//! Limites par plan d'abonnement.
//!
//! Table fournie par la config (nom du plan → limites), avec repli sur le plan
//! par défaut quand le nom est absent ou inconnu.

use crate::models::BotKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Préfixe des noms de produits Stripe ("Enhance Stream Basic" → "Basic").
const PRODUCT_PREFIX: &str = "Enhance Stream ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub viewers: u32,
    pub chatters: u32,
}

impl PlanLimits {
    pub fn for_kind(&self, kind: BotKind) -> u32 {
        match kind {
            BotKind::Viewer => self.viewers,
            BotKind::Chatter => self.chatters,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanTable {
    pub default_plan: String,
    pub plans: HashMap<String, PlanLimits>,
}

impl PlanTable {
    pub fn limits_for(&self, plan: Option<&str>) -> PlanLimits {
        let found = plan.and_then(|name| {
            let name = name.trim();
            self.plans
                .get(name)
                .or_else(|| name.strip_prefix(PRODUCT_PREFIX).and_then(|base| self.plans.get(base)))
        });

        match found.or_else(|| self.plans.get(&self.default_plan)) {
            Some(limits) => *limits,
            None => PlanLimits { viewers: 0, chatters: 0 },
        }
    }
}

impl Default for PlanTable {
    fn default() -> Self {
        let plans = [
            ("Free", 10, 1),
            ("Starter", 25, 5),
            ("Basic", 50, 10),
            ("Professional", 200, 30),
            ("Expert", 300, 90),
            ("Ultimate", 1000, 200),
            // ancien nom de produit, limites de l'Ultimate
            ("Stream Expert", 1000, 200),
        ]
        .into_iter()
        .map(|(name, viewers, chatters)| (name.to_string(), PlanLimits { viewers, chatters }))
        .collect();

        Self {
            default_plan: "Free".into(),
            plans,
        }
    }
}
