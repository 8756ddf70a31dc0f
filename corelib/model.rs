//! Prefixed, lexicographically sortable identifiers.
//!
//! Grounded on the teacher's `lib::model` id scheme (`define_model_id!`),
//! stripped of the multi-tenant shard component: this core has no project
//! ownership concept, so an id is just `<prefix>_<ulid>`.

use ulid::Ulid;

pub trait ModelId: Sized + std::fmt::Display {
    fn has_valid_prefix(&self) -> bool;
    fn value(&self) -> &str;
}

pub(crate) fn generate_raw_id(prefix: &str) -> String {
    format!("{prefix}_{}", Ulid::new())
}

macro_rules! define_model_id {
    (
        #[prefix = $prefix:literal]
        $(#[$m:meta])*
        $type_vis:vis struct $name:ident;
    ) => {
        $(#[$m])*
        #[derive(
            Debug,
            Hash,
            Clone,
            Default,
            ::serde::Serialize,
            ::serde::Deserialize,
            Eq,
            PartialEq,
            PartialOrd,
            Ord,
            ::derive_more::Display,
            ::derive_more::From,
            ::derive_more::Into,
        )]
        #[serde(transparent)]
        $type_vis struct $name(String);

        impl $crate::model::ModelId for $name {
            fn has_valid_prefix(&self) -> bool {
                self.0.starts_with(concat!($prefix, "_"))
            }
            fn value(&self) -> &str {
                &self.0
            }
        }

        impl $name {
            pub fn generate() -> Self {
                Self($crate::model::generate_raw_id($prefix))
            }

            pub fn from_string(s: String) -> Self {
                Self(s)
            }
        }
    };
}

pub(crate) use define_model_id;

#[cfg(test)]
mod tests {
    use super::*;

    define_model_id! {
        #[prefix = "test"]
        pub struct TestId;
    }

    #[test]
    fn generated_id_has_prefix_and_sorts() {
        let a = TestId::generate();
        assert!(a.has_valid_prefix());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TestId::generate();
        assert!(b > a);
    }
}
