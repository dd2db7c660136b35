mod helpers;
mod tests_redo;
