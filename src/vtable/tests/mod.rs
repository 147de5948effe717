mod helpers;
mod tests_builder;
mod tests_gc;
mod tests_manager;
