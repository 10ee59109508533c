pub mod attachment_service;
pub mod composer;
pub mod dispatcher;
pub mod recorder;
