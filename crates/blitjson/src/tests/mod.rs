mod arbitrary;
mod escapes;
mod parse_bad;
mod property_partition;
