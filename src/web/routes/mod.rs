pub mod url_routes;
