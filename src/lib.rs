//! Friends' study-room bookings for one workweek: fetched per room, filtered to
//! a friend roster, merged and laid out as a lane-packed weekly board.

pub mod application;
pub mod domain;
pub mod infrastructure;
