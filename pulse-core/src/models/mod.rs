pub mod assessment;
pub mod message;

pub use assessment::{
    Airway, AssessmentRecord, AssessmentUpdate, Breathing, Pulse, Responsiveness,
};
pub use message::{Message, Role};
