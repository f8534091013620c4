mod cache_keys;
