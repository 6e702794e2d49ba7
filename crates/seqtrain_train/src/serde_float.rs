//! JSON encoding for `f32` values that may be non-finite.
//!
//! `serde_json` writes NaN and infinities as `null` and refuses to read
//! `null` back as a float. These helpers write NaN as `null` and infinities
//! as the strings `"inf"` / `"-inf"`, and accept all three forms on input,
//! so saved states and snapshots always load.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{ArrayD, IxDyn};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// One `f32` with a lossless JSON form.
#[derive(Debug, Clone, Copy)]
struct Float(f32);

impl Serialize for Float {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.0;
        if v.is_nan() {
            serializer.serialize_none()
        } else if v == f32::INFINITY {
            serializer.serialize_str("inf")
        } else if v == f32::NEG_INFINITY {
            serializer.serialize_str("-inf")
        } else {
            serializer.serialize_f32(v)
        }
    }
}

struct FloatVisitor;

impl<'de> Visitor<'de> for FloatVisitor {
    type Value = Float;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number, null, \"inf\", \"-inf\" or \"nan\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Float, E> {
        Ok(Float(v as f32))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Float, E> {
        Ok(Float(v as f32))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Float, E> {
        Ok(Float(v as f32))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Float, E> {
        Ok(Float(f32::NAN))
    }

    fn visit_none<E: de::Error>(self) -> Result<Float, E> {
        Ok(Float(f32::NAN))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Float, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Float, E> {
        match v.to_ascii_lowercase().as_str() {
            "inf" | "+inf" | "infinity" => Ok(Float(f32::INFINITY)),
            "-inf" | "-infinity" => Ok(Float(f32::NEG_INFINITY)),
            "nan" => Ok(Float(f32::NAN)),
            _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for Float {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }
}

struct FloatSlice<'a>(&'a [f32]);

impl Serialize for FloatSlice<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|&v| Float(v)))
    }
}

/// A single scalar, for `#[serde(with = "...")]`.
pub(crate) mod scalar {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        Float(*value).serialize(serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        Ok(Float::deserialize(deserializer)?.0)
    }
}

/// Named scalars, such as the metrics of one epoch.
pub(crate) mod scalar_map {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        map: &BTreeMap<String, f32>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, &v)| (k, Float(v))))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, f32>, D::Error> {
        let raw = BTreeMap::<String, Float>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
    }
}

/// Named series of scalars.
pub(crate) mod series_map {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        map: &BTreeMap<String, Vec<f32>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k, FloatSlice(v))))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<f32>>, D::Error> {
        let raw = BTreeMap::<String, Vec<Float>>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().map(|f| f.0).collect()))
            .collect())
    }
}

/// Named tensors, stored as `{"dim": [...], "data": [...]}` in row-major order.
pub(crate) mod tensor_map {
    use super::*;

    #[derive(Serialize)]
    struct TensorOut<'a> {
        dim: &'a [usize],
        data: Vec<Float>,
    }

    #[derive(Deserialize)]
    struct TensorIn {
        dim: Vec<usize>,
        data: Vec<Float>,
    }

    pub(crate) fn serialize<S: Serializer>(
        map: &BTreeMap<String, ArrayD<f32>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, a)| {
            (
                k,
                TensorOut {
                    dim: a.shape(),
                    data: a.iter().map(|&v| Float(v)).collect(),
                },
            )
        }))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, ArrayD<f32>>, D::Error> {
        let raw = BTreeMap::<String, TensorIn>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, t)| {
                let data = t.data.into_iter().map(|f| f.0).collect();
                ArrayD::from_shape_vec(IxDyn(&t.dim), data)
                    .map(|a| (k.clone(), a))
                    .map_err(|e| de::Error::custom(format!("tensor '{k}': {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Scalars {
        #[serde(with = "scalar")]
        best: f32,
        #[serde(with = "scalar_map")]
        metrics: BTreeMap<String, f32>,
    }

    #[test]
    fn test_non_finite_values_survive_json() {
        let value = Scalars {
            best: f32::INFINITY,
            metrics: BTreeMap::from([
                ("mean_dev_loss".to_string(), f32::NAN),
                ("mean_train_loss".to_string(), f32::NEG_INFINITY),
                ("lr".to_string(), 0.25),
            ]),
        };
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains(r#""mean_dev_loss":null"#), "{json}");
        assert!(json.contains(r#""-inf""#), "{json}");

        let back: Scalars = serde_json::from_str(&json).unwrap();
        assert_eq!(back.best, f32::INFINITY);
        assert!(back.metrics["mean_dev_loss"].is_nan());
        assert_eq!(back.metrics["mean_train_loss"], f32::NEG_INFINITY);
        assert_eq!(back.metrics["lr"], 0.25);
    }

    #[test]
    fn test_plain_numbers_and_strings_accepted() {
        let back: Scalars =
            serde_json::from_str(r#"{"best": 3, "metrics": {"a": "NaN", "b": 1e-3}}"#).unwrap();
        assert_eq!(back.best, 3.0);
        assert!(back.metrics["a"].is_nan());
        assert_eq!(back.metrics["b"], 1e-3);
        assert!(serde_json::from_str::<Scalars>(r#"{"best": "big", "metrics": {}}"#).is_err());
    }
}
