pub mod approval;
pub mod comment;
pub mod observation;
pub mod proposal;
