//! Per-kind forward (serialize, encrypt) and reverse (decrypt, deserialize)
//! transforms bound into the record schema by name.

use std::{fmt, marker::PhantomData, sync::Arc};

use cipherdo_core::values::{FieldType, FieldValue, SupportedType};
use thiserror::Error;
use tracing::warn;

use crate::cipher::{CipherError, FieldCipher};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("expected a {expected} value, got {actual}")]
    TypeMismatch {
        expected: SupportedType,
        actual: SupportedType,
    },
    #[error("non-finite float cannot be stored")]
    NonFinite,
    #[error("serialization failed: {0}")]
    Serialize(String),
    #[error("decryption failed: {0}")]
    Decrypt(#[from] CipherError),
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    #[error("payload holds {found} values, expected exactly one")]
    Arity { found: usize },
}

/// Transparent encryption for fields of one [`FieldType`].
///
/// The plaintext is a JSON array holding exactly one kind-tagged value, so the
/// encoder never sees a bare scalar and a payload of another kind never
/// decodes as `T`.
pub struct FieldTransformer<T: FieldType> {
    cipher: Arc<FieldCipher>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: FieldType> FieldTransformer<T> {
    pub fn new(cipher: Arc<FieldCipher>) -> Self {
        Self {
            cipher,
            _kind: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        T::KIND.transformer_name()
    }

    pub fn kind(&self) -> SupportedType {
        T::KIND
    }

    pub fn try_forward(&self, value: &T) -> Result<Vec<u8>, TransformError> {
        self.seal(&value.clone().into_value())
    }

    /// Forward a dynamically typed value; values of another kind are rejected.
    pub fn try_forward_value(&self, value: &FieldValue) -> Result<Vec<u8>, TransformError> {
        if value.kind() != T::KIND {
            return Err(TransformError::TypeMismatch {
                expected: T::KIND,
                actual: value.kind(),
            });
        }
        self.seal(value)
    }

    pub fn try_reverse(&self, sealed: &[u8]) -> Result<T, TransformError> {
        let plaintext = self.cipher.decrypt(sealed)?;
        let mut values: Vec<FieldValue> = serde_json::from_slice(&plaintext)
            .map_err(|e| TransformError::Deserialize(e.to_string()))?;
        if values.len() != 1 {
            return Err(TransformError::Arity {
                found: values.len(),
            });
        }

        let value = values.remove(0);
        let actual = value.kind();
        T::from_value(value).ok_or(TransformError::TypeMismatch {
            expected: T::KIND,
            actual,
        })
    }

    /// Best-effort forward: failures are logged and read as "no value".
    pub fn forward(&self, value: &T) -> Option<Vec<u8>> {
        self.try_forward(value)
            .map_err(|err| log_failure(self.name(), "forward", &err))
            .ok()
    }

    /// Best-effort reverse: unreadable ciphertext is logged and read as "no value".
    pub fn reverse(&self, sealed: &[u8]) -> Option<T> {
        self.try_reverse(sealed)
            .map_err(|err| log_failure(self.name(), "reverse", &err))
            .ok()
    }

    fn seal(&self, value: &FieldValue) -> Result<Vec<u8>, TransformError> {
        if let FieldValue::Float(f) = value {
            if !f.is_finite() {
                return Err(TransformError::NonFinite);
            }
        }
        let plaintext = serde_json::to_vec(std::slice::from_ref(value))
            .map_err(|e| TransformError::Serialize(e.to_string()))?;
        Ok(self.cipher.encrypt(&plaintext))
    }
}

impl<T: FieldType> Clone for FieldTransformer<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.cipher))
    }
}

impl<T: FieldType> fmt::Debug for FieldTransformer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldTransformer").field(&self.name()).finish()
    }
}

fn log_failure(transformer: &'static str, direction: &'static str, err: &TransformError) {
    warn!(transformer, direction, error = %err, "field transform failed; treating value as absent");
}

/// One transformer per [`SupportedType`], selected by tag.
#[derive(Debug, Clone)]
pub enum AnyTransformer {
    Text(FieldTransformer<String>),
    Integer(FieldTransformer<i64>),
    Float(FieldTransformer<f64>),
    Boolean(FieldTransformer<bool>),
    Timestamp(FieldTransformer<chrono::DateTime<chrono::Utc>>),
    Identifier(FieldTransformer<uuid::Uuid>),
}

macro_rules! dispatch {
    ($self:expr, $t:ident => $body:expr) => {
        match $self {
            AnyTransformer::Text($t) => $body,
            AnyTransformer::Integer($t) => $body,
            AnyTransformer::Float($t) => $body,
            AnyTransformer::Boolean($t) => $body,
            AnyTransformer::Timestamp($t) => $body,
            AnyTransformer::Identifier($t) => $body,
        }
    };
}

impl AnyTransformer {
    pub fn for_kind(kind: SupportedType, cipher: Arc<FieldCipher>) -> Self {
        match kind {
            SupportedType::Text => AnyTransformer::Text(FieldTransformer::new(cipher)),
            SupportedType::Integer => AnyTransformer::Integer(FieldTransformer::new(cipher)),
            SupportedType::Float => AnyTransformer::Float(FieldTransformer::new(cipher)),
            SupportedType::Boolean => AnyTransformer::Boolean(FieldTransformer::new(cipher)),
            SupportedType::Timestamp => AnyTransformer::Timestamp(FieldTransformer::new(cipher)),
            SupportedType::Identifier => AnyTransformer::Identifier(FieldTransformer::new(cipher)),
        }
    }

    pub fn name(&self) -> &'static str {
        dispatch!(self, t => t.name())
    }

    pub fn kind(&self) -> SupportedType {
        dispatch!(self, t => t.kind())
    }

    pub fn try_forward_value(&self, value: &FieldValue) -> Result<Vec<u8>, TransformError> {
        dispatch!(self, t => t.try_forward_value(value))
    }

    pub fn try_reverse_value(&self, sealed: &[u8]) -> Result<FieldValue, TransformError> {
        dispatch!(self, t => t.try_reverse(sealed).map(FieldType::into_value))
    }

    pub fn forward_value(&self, value: &FieldValue) -> Option<Vec<u8>> {
        self.try_forward_value(value)
            .map_err(|err| log_failure(self.name(), "forward", &err))
            .ok()
    }

    pub fn reverse_value(&self, sealed: &[u8]) -> Option<FieldValue> {
        self.try_reverse_value(sealed)
            .map_err(|err| log_failure(self.name(), "reverse", &err))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::key_manager::{KeyMaterial, IV_LEN, KEY_LEN};

    fn zero_cipher() -> Arc<FieldCipher> {
        Arc::new(
            FieldCipher::new(&KeyMaterial {
                key: [0u8; KEY_LEN],
                iv: [0u8; IV_LEN],
            })
            .expect("cipher"),
        )
    }

    fn assert_round_trip<T: FieldType + PartialEq + fmt::Debug>(samples: &[T]) {
        let transformer = FieldTransformer::<T>::new(zero_cipher());
        for sample in samples {
            let sealed = transformer.forward(sample).expect("forward");
            assert_eq!(transformer.reverse(&sealed).as_ref(), Some(sample));
        }
    }

    #[test]
    fn round_trips_every_kind_including_edge_values() {
        assert_round_trip(&[
            String::new(),
            "buy milk".to_string(),
            "ünïcødé ✓ \"quoted\"\n".to_string(),
        ]);
        assert_round_trip(&[0i64, -1, 42, i64::MIN, i64::MAX]);
        assert_round_trip(&[0.0f64, -0.5, 1.0e-300, f64::MAX, f64::MIN_POSITIVE, 0.1 + 0.2]);
        assert_round_trip(&[true, false]);
        assert_round_trip(&[
            DateTime::<Utc>::MIN_UTC,
            DateTime::<Utc>::MAX_UTC,
            Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap(),
            Utc::now(),
        ]);
        assert_round_trip(&[Uuid::nil(), Uuid::from_bytes([0xff; 16]), Uuid::new_v4()]);
    }

    #[test]
    fn buy_milk_scenario_with_zero_key() {
        let text = FieldTransformer::<String>::new(zero_cipher());
        let milk = text.forward(&"buy milk".to_string()).expect("forward");
        let eggs = text.forward(&"buy eggs".to_string()).expect("forward");

        assert_ne!(milk, eggs);
        assert_eq!(text.reverse(&milk).as_deref(), Some("buy milk"));
    }

    #[test]
    fn tampered_ciphertext_reads_as_absent() {
        let text = FieldTransformer::<String>::new(zero_cipher());
        let sealed = text.forward(&"buy milk".to_string()).expect("forward");
        for i in [0, sealed.len() / 2, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[i] = tampered[i].wrapping_add(1);
            assert_eq!(text.reverse(&tampered), None);
        }
        assert!(matches!(
            text.try_reverse(&sealed[..sealed.len() - 1]),
            Err(TransformError::Decrypt(_))
        ));
    }

    #[test]
    fn payload_of_another_kind_is_rejected() {
        let cipher = zero_cipher();
        let integers = FieldTransformer::<i64>::new(Arc::clone(&cipher));
        let floats = FieldTransformer::<f64>::new(Arc::clone(&cipher));
        let texts = FieldTransformer::<String>::new(Arc::clone(&cipher));
        let ids = FieldTransformer::<Uuid>::new(cipher);

        let sealed = integers.forward(&42).expect("forward");
        assert_eq!(
            floats.try_reverse(&sealed),
            Err(TransformError::TypeMismatch {
                expected: SupportedType::Float,
                actual: SupportedType::Integer,
            })
        );
        assert_eq!(texts.reverse(&sealed), None);

        let id_text = texts.forward(&Uuid::nil().to_string()).expect("forward");
        assert_eq!(ids.reverse(&id_text), None);
    }

    #[test]
    fn forward_value_rejects_wrong_kind() {
        let any = AnyTransformer::for_kind(SupportedType::Boolean, zero_cipher());
        assert_eq!(
            any.try_forward_value(&FieldValue::Text("yes".into())),
            Err(TransformError::TypeMismatch {
                expected: SupportedType::Boolean,
                actual: SupportedType::Text,
            })
        );
        assert_eq!(any.forward_value(&FieldValue::Integer(1)), None);

        let sealed = any.forward_value(&FieldValue::Boolean(true)).expect("forward");
        assert_eq!(any.reverse_value(&sealed), Some(FieldValue::Boolean(true)));
    }

    #[test]
    fn non_finite_floats_are_refused() {
        let floats = FieldTransformer::<f64>::new(zero_cipher());
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(floats.try_forward(&value), Err(TransformError::NonFinite));
            assert_eq!(floats.forward(&value), None);
        }
    }

    #[test]
    fn container_must_hold_exactly_one_value() {
        let cipher = zero_cipher();
        let texts = FieldTransformer::<String>::new(Arc::clone(&cipher));

        let empty = cipher.encrypt(b"[]");
        assert_eq!(texts.try_reverse(&empty), Err(TransformError::Arity { found: 0 }));

        let two = cipher.encrypt(br#"[{"Text":"a"},{"Text":"b"}]"#);
        assert_eq!(texts.try_reverse(&two), Err(TransformError::Arity { found: 2 }));

        let bare = cipher.encrypt(br#""buy milk""#);
        assert!(matches!(
            texts.try_reverse(&bare),
            Err(TransformError::Deserialize(_))
        ));
    }

    #[test]
    fn names_follow_kind() {
        let cipher = zero_cipher();
        for kind in SupportedType::ALL {
            let any = AnyTransformer::for_kind(kind, Arc::clone(&cipher));
            assert_eq!(any.kind(), kind);
            assert_eq!(any.name(), kind.transformer_name());
        }
        assert_eq!(FieldTransformer::<bool>::new(cipher).name(), "BooleanTransformer");
    }

    #[test]
    fn shared_transformer_is_usable_across_threads() {
        let texts = FieldTransformer::<String>::new(zero_cipher());
        std::thread::scope(|scope| {
            for n in 0..4 {
                let texts = &texts;
                scope.spawn(move || {
                    let value = format!("task {n}");
                    let sealed = texts.forward(&value).expect("forward");
                    assert_eq!(texts.reverse(&sealed), Some(value));
                });
            }
        });
    }
}
