mod auth;
mod helpers;
mod notify;
mod scenarios;
mod trackers;
