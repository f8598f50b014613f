//! The provider-independent representation of conversational content.
//!
//! Every backend speaks a different wire format, so each adapter converts
//! to and from these types at its edge. Internally the rest of the crate
//! (tool dispatch, the turn loop, session persistence) only ever sees
//! [`part::Part`] values tagged with a [`role::Role`].

pub mod history;
pub mod part;
pub mod role;
