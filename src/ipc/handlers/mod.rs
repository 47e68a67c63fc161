pub mod achievements;
pub mod backup_exchange;
pub mod core;
pub mod courses;
pub mod events;
pub mod exams;
pub mod flashcards;
pub mod leaderboard;
pub mod levels;
pub mod users;
