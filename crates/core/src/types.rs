use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! newtype_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a numeric identifier.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Return the numeric identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

newtype_id!(ProjectId, "Numeric identifier of a tenant project.");
newtype_id!(BranchId, "Numeric identifier of a development branch within a project.");
newtype_string!(SourceId, "Identifier of a data source within a branch.");
newtype_string!(SinkId, "Identifier of a sink within a source.");
newtype_string!(VolumeId, "Identifier of a local disk volume that writes slices.");
newtype_string!(BucketId, "Remote bucket identifier, e.g. `in.c-my-bucket`.");
newtype_string!(TableId, "Remote table identifier, e.g. `in.c-my-bucket.my-table`.");

impl TableId {
    /// The bucket part of the table identifier.
    ///
    /// Everything before the last `.` separator.
    #[must_use]
    pub fn bucket_id(&self) -> BucketId {
        match self.0.rsplit_once('.') {
            Some((bucket, _)) => BucketId::new(bucket),
            None => BucketId::new(""),
        }
    }

    /// The table name without the bucket prefix.
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.0.rsplit_once('.').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl BucketId {
    /// Split the bucket identifier into its stage (`in`/`out`) and display name.
    ///
    /// The `c-` prefix of the name part is stripped, matching how the remote
    /// API derives bucket ids from the name it was created with.
    #[must_use]
    pub fn stage_and_name(&self) -> (&str, &str) {
        match self.0.split_once('.') {
            Some((stage, rest)) => (stage, rest.strip_prefix("c-").unwrap_or(rest)),
            None => ("in", self.0.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_id_parts() {
        let id = TableId::new("in.c-bucket.my-table");
        assert_eq!(id.bucket_id(), BucketId::new("in.c-bucket"));
        assert_eq!(id.table_name(), "my-table");
    }

    #[test]
    fn bucket_stage_and_name() {
        assert_eq!(BucketId::new("in.c-bucket").stage_and_name(), ("in", "bucket"));
        assert_eq!(BucketId::new("out.c-x").stage_and_name(), ("out", "x"));
    }

    #[test]
    fn numeric_ids_serialize_transparently() {
        let json = serde_json::to_string(&ProjectId::new(123)).unwrap();
        assert_eq!(json, "123");
        let back: ProjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(), 123);
    }
}
