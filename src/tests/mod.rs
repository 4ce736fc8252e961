
mod test_interval_gate;
