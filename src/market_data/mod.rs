// Market data module entrypoint
pub mod adapters;       // feed transports (Binance websocket, scripted channel)
pub mod book;           // bounded best-first book sides + mid price
pub mod normaliser;     // raw depth JSON -> BookSnapshot
