pub mod appointment;
pub mod billing;
pub mod client;
pub mod clinic;
pub mod doctor;
pub mod enums;
pub mod holiday;
pub mod identity;
pub mod insurance;
pub mod invite;
pub mod organization;
pub mod patient;
pub mod plan;
pub mod system_user;

pub use appointment::*;
pub use billing::*;
pub use client::*;
pub use clinic::*;
pub use doctor::*;
pub use enums::*;
pub use holiday::*;
pub use identity::*;
pub use insurance::*;
pub use invite::*;
pub use organization::*;
pub use patient::*;
pub use plan::*;
pub use system_user::*;
