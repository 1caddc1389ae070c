pub mod wizard;

pub use wizard::{BookingStep, Wizard, WizardError};
