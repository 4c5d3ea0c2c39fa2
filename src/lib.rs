pub mod city;
pub mod clean;
pub mod error;
pub mod fetch;
pub mod header;
pub mod output;
pub mod pipeline;
pub mod reference;
pub mod schema;
pub mod stats;
pub mod table;
