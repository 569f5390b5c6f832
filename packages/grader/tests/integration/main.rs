mod admin;
mod grading;
mod support;
