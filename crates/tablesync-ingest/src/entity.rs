//! Entity pipelines: one resolved row of the dispatch table

use std::fmt;
use tablesync_common::Identifier;

use crate::config::{EntityConfig, MappingConfig, SyncConfig};
use crate::mapper::{CompositeKeyMapper, DirectMapper, EntityMapper};
use crate::reference::ReferenceTable;
use crate::table::TargetTable;

/// Everything needed to sync one entity type: where its rows come from,
/// how they map, and which table they land in.
pub struct EntityPipeline {
    pub name: String,
    pub location: String,
    pub table: TargetTable,
    pub mapper: Box<dyn EntityMapper>,
}

impl EntityPipeline {
    pub fn from_config(
        config: &SyncConfig,
        entity: &EntityConfig,
    ) -> tablesync_common::Result<Self> {
        let (key_column, mapper): (&str, Box<dyn EntityMapper>) = match &entity.mapping {
            MappingConfig::Direct {
                key_column,
                payload_columns,
            } => {
                let columns = payload_columns
                    .iter()
                    .map(|c| Identifier::parse(c))
                    .collect::<tablesync_common::Result<Vec<_>>>()?;
                (key_column.as_str(), Box::new(DirectMapper::new(columns)))
            },
            MappingConfig::CompositeKey {
                key_column,
                natural_column,
                reference_column,
                separator,
                reference,
            } => {
                let mapper = CompositeKeyMapper::new(
                    Identifier::parse(natural_column)?,
                    Identifier::parse(reference_column)?,
                    separator.as_str(),
                    ReferenceTable::new(
                        &reference.table,
                        &reference.id_column,
                        &reference.label_column,
                    )?,
                );
                (key_column.as_str(), Box::new(mapper))
            },
        };

        let table = TargetTable::new(
            Identifier::parse(&entity.table)?,
            Identifier::parse(key_column)?,
            mapper.payload_columns().to_vec(),
        )?;

        Ok(Self {
            name: entity.name.clone(),
            location: config.location_of(entity),
            table,
            mapper,
        })
    }

    /// Pipelines for the selected entity types, in configured order
    pub fn all(config: &SyncConfig, only: &[String]) -> anyhow::Result<Vec<Self>> {
        config
            .select(only)?
            .into_iter()
            .map(|entity| Self::from_config(config, entity).map_err(anyhow::Error::from))
            .collect()
    }
}

impl fmt::Debug for EntityPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityPipeline")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("table", &self.table)
            .field("policy", &self.mapper.policy())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dispatch_table() {
        let config = SyncConfig::default();
        let pipelines = EntityPipeline::all(&config, &[]).unwrap();

        assert_eq!(pipelines.len(), 2);

        let users = &pipelines[0];
        assert_eq!(users.name, "users");
        assert_eq!(users.table.name().as_str(), "l21s_users");
        assert_eq!(users.mapper.policy(), "direct");
        assert!(users.location.ends_with("/users.csv"));

        let permissions = &pipelines[1];
        assert_eq!(permissions.mapper.policy(), "composite_key");
        let columns: Vec<&str> = permissions
            .table
            .payload_columns()
            .iter()
            .map(Identifier::as_str)
            .collect();
        assert_eq!(columns, vec!["user_id", "permission_type_id"]);
        assert_eq!(
            permissions.mapper.reference().unwrap().table.as_str(),
            "l21s_permission_types"
        );
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let mut config = SyncConfig::default();
        config.entities[0].table = "l21s-users".to_string();

        let err = EntityPipeline::from_config(&config, &config.entities[0]).unwrap_err();
        assert!(matches!(
            err,
            tablesync_common::TableSyncError::InvalidIdentifier(_)
        ));
    }

    #[test]
    fn test_filtered_pipelines() {
        let config = SyncConfig::default();
        let pipelines = EntityPipeline::all(&config, &["user_permissions".to_string()]).unwrap();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(pipelines[0].name, "user_permissions");
    }
}
