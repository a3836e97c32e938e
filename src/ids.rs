//! Typed UUID wrappers for compile-time type safety.
//!
//! Prevents accidentally mixing up different entity ids (e.g. passing a
//! `UserId` where a `JobId` is expected) while still storing and binding
//! as a plain `uuid::Uuid` at the sqlx boundary.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A typed wrapper around `Uuid`. `T` is a zero-sized marker for the
/// entity this id belongs to; ids with different markers are
/// incompatible at compile time.
pub struct Id<T> {
    inner: Uuid,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Generate a new time-ordered (v7) id.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }

    pub fn from_uuid(inner: Uuid) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn as_uuid(&self) -> Uuid {
        self.inner
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}
impl<T> Eq for Id<T> {}

impl<T> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.hash(state)
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl<T> From<Uuid> for Id<T> {
    fn from(inner: Uuid) -> Self {
        Self::from_uuid(inner)
    }
}

impl<T> From<Id<T>> for Uuid {
    fn from(id: Id<T>) -> Self {
        id.inner
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_uuid(Uuid::deserialize(deserializer)?))
    }
}

// sqlx maps straight through to the underlying Uuid column type.
impl<T: Send + Sync> sqlx::Type<sqlx::Postgres> for Id<T> {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Uuid as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'q, T: Send + Sync> sqlx::Encode<'q, sqlx::Postgres> for Id<T> {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <Uuid as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.inner, buf)
    }
}

impl<'r, T: Send + Sync> sqlx::Decode<'r, sqlx::Postgres> for Id<T> {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        Ok(Self::from_uuid(<Uuid as sqlx::Decode<sqlx::Postgres>>::decode(value)?))
    }
}

/// Marker types for each entity id.
pub struct PlanMarker;
pub struct UserMarker;
pub struct JobMarker;
pub struct ArtifactMarker;

pub type PlanId = Id<PlanMarker>;
pub type UserId = Id<UserMarker>;
pub type JobId = Id<JobMarker>;
pub type ArtifactId = Id<ArtifactMarker>;

/// A worker's self-assigned identifier, carried in heartbeat payloads.
/// Unlike the entity ids above this is operator-assigned (e.g.
/// `"gpu-node-3"`), not generated, so it's a plain newtype over String.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
