mod conformance;
mod lifecycle;
mod ports;
mod predicates;
