pub mod db;
pub mod file_utils;
