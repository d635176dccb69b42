use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::layer::{ApprovableType, ApproverLayer};
use crate::errors::StoreError;
use crate::ports::ConfigurationStore;

/// Why no workflow applies to a submission. Never an error for the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConfigMissing {
    UnknownApprovableType { type_key: String },
    NoActiveLayers { type_key: String },
}

/// Active layers of one approvable type grouped by ascending level. Layers
/// inside a level are parallel slots, kept in ascending layer id order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPlan {
    pub approvable_type: ApprovableType,
    levels: BTreeMap<i32, Vec<ApproverLayer>>,
}

impl LayerPlan {
    pub fn new(approvable_type: ApprovableType, layers: Vec<ApproverLayer>) -> Self {
        let mut levels: BTreeMap<i32, Vec<ApproverLayer>> = BTreeMap::new();
        for layer in layers.into_iter().filter(ApproverLayer::is_active) {
            levels.entry(layer.level).or_default().push(layer);
        }
        for slots in levels.values_mut() {
            slots.sort_by_key(|layer| layer.id);
        }

        Self { approvable_type, levels }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn min_level(&self) -> Option<i32> {
        self.levels.keys().next().copied()
    }

    pub fn next_level_after(&self, level: i32) -> Option<i32> {
        self.levels.range(level.saturating_add(1)..).next().map(|(level, _)| *level)
    }

    pub fn layers_at(&self, level: i32) -> &[ApproverLayer] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn levels(&self) -> impl Iterator<Item = (i32, &[ApproverLayer])> {
        self.levels.iter().map(|(level, layers)| (*level, layers.as_slice()))
    }
}

pub struct LayerPlanner<'a, C: ?Sized> {
    config: &'a C,
}

impl<'a, C> LayerPlanner<'a, C>
where
    C: ConfigurationStore + ?Sized,
{
    pub fn new(config: &'a C) -> Self {
        Self { config }
    }

    /// Pure read of the configured ladder for `type_key`.
    pub async fn layers_for(
        &self,
        type_key: &str,
    ) -> Result<Result<LayerPlan, ConfigMissing>, StoreError> {
        let Some(approvable_type) = self.config.approvable_type(type_key).await? else {
            return Ok(Err(ConfigMissing::UnknownApprovableType {
                type_key: type_key.to_string(),
            }));
        };

        let layers = self.config.active_layers(approvable_type.id).await?;
        let plan = LayerPlan::new(approvable_type, layers);
        if plan.is_empty() {
            return Ok(Err(ConfigMissing::NoActiveLayers { type_key: type_key.to_string() }));
        }

        Ok(Ok(plan))
    }
}
