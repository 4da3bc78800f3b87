use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! surrogate_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub fn next(self) -> Self {
                Self(self.0 + 1)
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

// Tasks, runs and steps are monotonic surrogate keys assigned by their
// respective stores, never client-supplied.
surrogate_id!(TaskId);
surrogate_id!(RunId);
surrogate_id!(StepId);
surrogate_id!(ValidationId);
surrogate_id!(ReactivationId);
