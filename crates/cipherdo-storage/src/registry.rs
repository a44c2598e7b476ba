use std::{collections::BTreeMap, sync::Arc};

use cipherdo_core::values::SupportedType;
use thiserror::Error;
use tracing::debug;

use crate::{cipher::FieldCipher, transformer::AnyTransformer};

/// Transformers keyed by the name schema fields bind to.
pub type TransformerMap = BTreeMap<String, AnyTransformer>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("transformers are already registered")]
    AlreadyRegistered,
    #[error("transformer registered as {name} is a {actual}")]
    NameMismatch { name: String, actual: &'static str },
    #[error("no transformer registered as {0}")]
    Unknown(String),
}

/// One transformer per supported kind, all sharing `cipher`.
pub fn standard_transformers(cipher: Arc<FieldCipher>) -> TransformerMap {
    SupportedType::ALL
        .into_iter()
        .map(|kind| {
            (
                kind.transformer_name().to_string(),
                AnyTransformer::for_kind(kind, Arc::clone(&cipher)),
            )
        })
        .collect()
}

/// Name-to-transformer bindings, filled exactly once during store setup.
#[derive(Debug, Default)]
pub struct TransformerRegistry {
    transformers: Option<TransformerMap>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transformers(
        &mut self,
        transformers: TransformerMap,
    ) -> Result<(), RegistryError> {
        if self.transformers.is_some() {
            return Err(RegistryError::AlreadyRegistered);
        }
        if let Some((name, transformer)) = transformers
            .iter()
            .find(|(name, transformer)| name.as_str() != transformer.name())
        {
            return Err(RegistryError::NameMismatch {
                name: name.clone(),
                actual: transformer.name(),
            });
        }

        debug!(count = transformers.len(), "registered field transformers");
        self.transformers = Some(transformers);
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.transformers.is_some()
    }

    pub fn get(&self, name: &str) -> Result<&AnyTransformer, RegistryError> {
        self.transformers
            .as_ref()
            .and_then(|map| map.get(name))
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.transformers
            .iter()
            .flat_map(|map| map.keys().map(String::as_str))
    }
}
