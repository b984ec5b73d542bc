mod mocks;
mod tests_server_sent_events;
