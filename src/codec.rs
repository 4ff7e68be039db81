//! Wire form of [`IdentifiedMap`]: a flat sequence of elements in current
//! order. The split order/table representation never appears on the wire, and
//! no separate order field is emitted; order is positional in the sequence.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserializer, IgnoredAny, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::{Identifiable, IdentifiedMap};

impl<V> Serialize for IdentifiedMap<V>
where
    V: Identifiable + Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for value in self {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

/// Decoding is tolerant of individually malformed elements: each sequence
/// entry is tried as a `V` and otherwise consumed and dropped, so one corrupt
/// element does not abort the rest. The untagged fallback to [`IgnoredAny`]
/// cannot fail, which is what makes the skip total.
#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeValid<V> {
    Valid(V),
    Skipped(IgnoredAny),
}

struct SeqVisitor<V>(PhantomData<V>);

impl<'de, V> Visitor<'de> for SeqVisitor<V>
where
    V: Identifiable + Deserialize<'de>,
{
    type Value = IdentifiedMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a sequence of identified elements")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(element) = seq.next_element::<MaybeValid<V>>()? {
            if let MaybeValid::Valid(value) = element {
                values.push(value);
            }
        }
        Ok(values.into_iter().collect())
    }
}

impl<'de, V> Deserialize<'de> for IdentifiedMap<V>
where
    V: Identifiable + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // A non-sequence outer container is a hard error, not an empty map.
        deserializer.deserialize_seq(SeqVisitor(PhantomData))
    }
}
