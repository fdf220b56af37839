//! Relay of WebSub feed updates to Telegram chats.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod feed;
pub mod forwarder;
pub mod handlers;
pub mod hub;
pub mod markdown;
pub mod telegram;
pub mod watchlist;
