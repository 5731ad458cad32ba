pub mod url_models;
