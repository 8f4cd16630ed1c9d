pub mod config;
pub mod description_cache;
pub mod description_fetcher;
pub mod description_transport;
pub mod dom;
pub mod hover_tooltip;
pub mod navigation;
pub mod page_runtime;
pub mod pipeline;
pub mod poster_discovery;
pub mod poster_record;
pub mod poster_renderer;
pub mod protocol;
pub mod search_url;
pub mod settings;
pub mod settings_persistence;
pub mod timers;
