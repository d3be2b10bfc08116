/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Framed transport and connection management.

pub mod connection;

pub mod framing;

pub mod manager;
