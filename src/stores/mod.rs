pub mod wallet_tracker;
pub mod watchlist;

pub use wallet_tracker::WalletTrackerStore;
pub use watchlist::WatchlistStore;
