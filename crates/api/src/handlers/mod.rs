pub mod health;
pub mod jobs;
pub mod managers;
pub mod tasks;
